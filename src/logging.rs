//! Default logging subscriber, grounded on the source socket layer's
//! `setup_logging`: colored `fern` dispatch to stdout, timestamped via
//! `chrono`. Installing a global logger is a one-shot operation; a second
//! call (e.g. from a second `request`) fails quietly, matching `fern`'s
//! own behavior when a logger is already set.

use colored::Color;
use fern::colors::ColoredLevelConfig;

pub fn init() {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::White)
        .debug(Color::Green)
        .trace(Color::Blue);

    let _ = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}{}[{}][{}] {}",
                format_args!("\x1B[{}m", colors.get_color(&record.level()).to_fg_str()),
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply();
}
