use crate::sensor::SensorError;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const MAX_FAULT_HISTORY: usize = 64;

/// Where in a tick a sensor fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultStage {
    DueCheck,
    Observe,
    Notify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub sensor_id: String,
    pub stage: FaultStage,
    pub sim_time_seconds: f64,
    pub message: String,
}

/// Receives per-sensor fault reports from the scheduler.
pub trait FaultSink: Send + Sync {
    fn report(&self, sensor_id: &str, stage: FaultStage, sim_time_seconds: f64, error: &SensorError);
}

/// Default sink: one `warn!` event per fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, sensor_id: &str, stage: FaultStage, sim_time_seconds: f64, error: &SensorError) {
        warn!(
            sensor = sensor_id,
            stage = ?stage,
            sim_time = sim_time_seconds,
            %error,
            "sensor fault isolated"
        );
    }
}

#[derive(Debug)]
struct FaultHistory {
    records: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    next_fault_id: u32,
}

/// Bounded in-memory fault history. The oldest record is evicted when full.
#[derive(Debug)]
pub struct FaultLog {
    history: Mutex<FaultHistory>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(FaultHistory {
                records: Vec::new(),
                next_fault_id: 1,
            }),
        }
    }

    pub fn record(
        &self,
        sensor_id: &str,
        stage: FaultStage,
        sim_time_seconds: f64,
        message: String,
    ) -> u32 {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        let fault_id = history.next_fault_id;
        history.next_fault_id = history.next_fault_id.wrapping_add(1);

        if history.records.is_full() {
            history.records.remove(0);
        }

        let _ = history.records.push(FaultRecord {
            id: fault_id,
            sensor_id: sensor_id.to_string(),
            stage,
            sim_time_seconds,
            message,
        });
        fault_id
    }

    /// Snapshot of the retained history, oldest first.
    pub fn records(&self) -> std::vec::Vec<FaultRecord> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.records.iter().cloned().collect()
    }

    pub fn count_for(&self, sensor_id: &str) -> usize {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history
            .records
            .iter()
            .filter(|record| record.sensor_id == sensor_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clear();
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultSink for FaultLog {
    fn report(&self, sensor_id: &str, stage: FaultStage, sim_time_seconds: f64, error: &SensorError) {
        let fault_id = self.record(sensor_id, stage, sim_time_seconds, error.to_string());
        debug!(fault_id, sensor = sensor_id, stage = ?stage, %error, "sensor fault recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_ids_increment() {
        let log = FaultLog::new();
        let first = log.record("a", FaultStage::Observe, 1.0, "boom".to_string());
        let second = log.record("b", FaultStage::DueCheck, 2.0, "bang".to_string());

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.count_for("a"), 1);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let log = FaultLog::new();
        for i in 0..(MAX_FAULT_HISTORY + 3) {
            log.record("radar", FaultStage::Observe, i as f64, format!("fault {i}"));
        }

        let records = log.records();
        assert_eq!(records.len(), MAX_FAULT_HISTORY);
        assert_eq!(records[0].id, 4);
        assert_eq!(records.last().unwrap().message, format!("fault {}", MAX_FAULT_HISTORY + 2));
    }

    #[test]
    fn test_report_stores_error_text() {
        let log = FaultLog::new();
        log.report("stn", FaultStage::Notify, 5.0, &SensorError::Failed("offline".to_string()));

        let records = log.records();
        assert_eq!(records[0].stage, FaultStage::Notify);
        assert!(records[0].message.contains("offline"));

        log.clear();
        assert!(log.is_empty());
    }
}
