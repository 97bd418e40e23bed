use std::error::Error;

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod http_source;
pub mod platform;
pub mod status;

pub fn main() {
    if let Err(error) = cli::main() {
        eprintln!("error: {error}");
        let mut source = error.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}
