//! Symserver.
//!
//! Symserver is a standalone web service that resolves raw memory addresses
//! from crash reports and profiler samples into function names, source files
//! and line numbers, using Breakpad symbol files fetched from upstream symbol
//! stores.

mod cli;
mod endpoints;
mod logging;
mod server;
mod service;

#[cfg(test)]
mod test;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
