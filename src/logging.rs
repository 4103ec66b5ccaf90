use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::configuration::LogLevel;

pub fn init_logging(level: Option<LogLevel>) {
    let log_level: LevelFilter = match level {
        Some(LogLevel::Trace) => LevelFilter::TRACE,
        Some(LogLevel::Debug) => LevelFilter::DEBUG,
        Some(LogLevel::Warn) => LevelFilter::WARN,
        Some(LogLevel::Error) => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(
        format!("mount_box={}", log_level)
            .parse()
            .expect("this directive will always work"),
    );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_names(true)
        .with_timer(tracing_subscriber::fmt::time::OffsetTime::new(
            time::UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())
                .expect("time... works"),
            time::macros::format_description!("[hour]:[minute]:[second]"),
        ));

    tracing_subscriber::Registry::default()
        .with(fmt_layer)
        .with(filter)
        .init();
}
