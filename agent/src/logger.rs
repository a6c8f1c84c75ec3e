//! log4rs setup for the binary.

use std::io::IsTerminal;
use std::panic;

use log::{error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::json::JsonEncoder;
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::Encode;
use log4rs::{Config, Handle};

use common::error::{Error, Result};

const PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%S%.3f%:z)} {h({l:<5})} {t} - {m}{n}";

/// Human-readable lines on a terminal or when asked for, JSON otherwise.
fn encoder(standard_log: bool) -> Box<dyn Encode> {
    if standard_log || std::io::stdout().is_terminal() {
        Box::new(PatternEncoder::new(PATTERN))
    } else {
        Box::new(JsonEncoder::new())
    }
}

fn config(level: LevelFilter, standard_log: bool) -> Result<Config> {
    let stdout = ConsoleAppender::builder().encoder(encoder(standard_log)).build();
    Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| Error::config("logging", e))
}

/// Installs the console logger and routes panics to it.
pub fn init(level: LevelFilter, standard_log: bool) -> Result<Handle> {
    let handle = log4rs::init_config(config(level, standard_log)?).map_err(|e| Error::config("logging", e))?;

    panic::set_hook(Box::new(|panic_info| {
        error!("{}", panic_info);
        let backtrace = std::backtrace::Backtrace::capture();
        error!("backtrace: {:#?}", backtrace);
    }));
    Ok(handle)
}

/// Switches the encoder once the config file has been read, since the file
/// may ask for standard logs too.
pub fn reconfigure(handle: &Handle, level: LevelFilter, standard_log: bool) -> Result<()> {
    handle.set_config(config(level, standard_log)?);
    Ok(())
}
