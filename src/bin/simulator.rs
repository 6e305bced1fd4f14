use clap::{App, Arg};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wxbus::record::observation_line;
use wxbus::sensor::{Field, GridPoint, ObservationContext, TruthState};
use wxbus::sensors::{RadarSensor, StationSensor};
use wxbus::{FaultLog, FaultSink, ObservationScheduler, SinkConfig, TelemetrySink};

const DEFAULT_DURATION_S: &str = "3600";
const DEFAULT_STEP_S: &str = "10";
const DEFAULT_TICK_MS: &str = "50";

/// Analytic squall line drifting east across the domain.
struct SquallLine {
    speed_m_s: f64,
    width_m: f64,
    peak_qr: f64,
    time: f64,
}

impl SquallLine {
    fn new() -> Self {
        Self {
            speed_m_s: 15.0,
            width_m: 6000.0,
            peak_qr: 4.0e-3,
            time: 0.0,
        }
    }

    fn front_x(&self) -> f64 {
        -20_000.0 + self.speed_m_s * self.time
    }
}

impl TruthState for SquallLine {
    fn sample(&self, field: Field, point: GridPoint) -> Option<f64> {
        let offset = point.x - self.front_x();
        let core = (-(offset / self.width_m).powi(2)).exp();

        let value = match field {
            Field::RainMixingRatio => self.peak_qr * core * (-point.z / 4000.0).exp(),
            Field::Temperature => 300.0 - 6.0 * core - 0.0065 * point.z,
            Field::Pressure => 101_325.0 * (-point.z / 8400.0).exp() + 150.0 * core,
            Field::WindU => 8.0 + 12.0 * core,
            Field::WindV => 2.0 * (offset / self.width_m).tanh(),
        };
        Some(value)
    }
}

fn validate_number(value: String) -> Result<(), String> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(()),
        _ => Err("Value must be a positive number".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("wxbus-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Weather sensor simulation streaming observations to a log collector")
        .arg(
            Arg::with_name("collector")
                .short("c")
                .long("collector")
                .value_name("URL")
                .help("Collector base URL (overrides WXBUS_COLLECTOR_URL)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("SECONDS")
                .help("Simulated time to run")
                .takes_value(true)
                .default_value(DEFAULT_DURATION_S)
                .validator(validate_number),
        )
        .arg(
            Arg::with_name("step")
                .short("s")
                .long("step")
                .value_name("SECONDS")
                .help("Simulated seconds per tick")
                .takes_value(true)
                .default_value(DEFAULT_STEP_S)
                .validator(validate_number),
        )
        .arg(
            Arg::with_name("tick-ms")
                .short("t")
                .long("tick-ms")
                .value_name("MILLISECONDS")
                .help("Wall-clock milliseconds between ticks")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(validate_number),
        )
        .get_matches();

    let mut config = SinkConfig::from_env();
    if let Some(url) = matches.value_of("collector") {
        config.base_url = url.to_string();
    }
    let duration: f64 = matches.value_of("duration").unwrap_or(DEFAULT_DURATION_S).parse()?;
    let step: f64 = matches.value_of("step").unwrap_or(DEFAULT_STEP_S).parse()?;
    let tick_ms: f64 = matches.value_of("tick-ms").unwrap_or(DEFAULT_TICK_MS).parse()?;

    info!(collector = %config.base_url, duration, step, "starting weather sensor simulation");

    let sink = TelemetrySink::new(config)?;
    let handshake = sink.clone();
    tokio::spawn(async move {
        if handshake.init().await.is_none() {
            warn!("running without telemetry");
        }
    });

    let faults = Arc::new(FaultLog::new());
    let fault_sink: Arc<dyn FaultSink> = faults.clone();
    let mut scheduler = ObservationScheduler::with_fault_sink(fault_sink);

    scheduler.add_sensor(
        RadarSensor::new("radar-1", GridPoint::new(0.0, 0.0, 10.0), 300.0)
            .with_azimuth(270.0)
            .with_gates(48, 1000.0),
    );
    scheduler.add_sensor(
        RadarSensor::new("radar-2", GridPoint::new(30_000.0, -20_000.0, 25.0), 300.0)
            .with_azimuth(315.0)
            .with_start(150.0),
    );
    for (index, x) in [-10_000.0, 0.0, 10_000.0, 20_000.0].into_iter().enumerate() {
        scheduler.add_sensor(StationSensor::new(
            format!("stn-{}", index + 1),
            GridPoint::new(x, 0.0, 2.0),
            60.0,
        ));
    }

    let records = sink.clone();
    scheduler.set_subscriber(move |observation| {
        let session = records.get_session();
        match observation_line(observation, session.as_ref().map(|s| s.run_id.as_str())) {
            Ok(line) => records.enqueue(line),
            Err(e) => warn!(sensor = %observation.sensor_id, "failed to serialize observation: {}", e),
        }
    });

    let mut truth = SquallLine::new();
    let mut interval = time::interval(Duration::from_secs_f64(tick_ms.max(1.0) / 1000.0));
    let mut sim_time = 0.0;

    while sim_time <= duration {
        interval.tick().await;
        truth.time = sim_time;
        scheduler.update(sim_time, &ObservationContext::new(&truth, sim_time));
        sim_time += step;
    }

    sink.shutdown().await;

    let stats = scheduler.stats();
    let sink_stats = sink.stats();
    info!(
        ticks = stats.ticks,
        observations = stats.observations,
        sensor_faults = faults.len(),
        delivered = sink_stats.delivered,
        batches = sink_stats.batches,
        discarded = sink_stats.discarded,
        "simulation finished"
    );

    Ok(())
}
