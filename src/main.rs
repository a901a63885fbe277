use flexi_logger::{Duplicate, FileSpec, Logger};
use log::{error, info};
use nevo::param;
use nevo::run;
use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn main() {
    let param_file = env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());
    let param = match param::get(param_file.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Could not load parameter file [{param_file}]: {e}");
            std::process::exit(1);
        }
    };

    let logger = Logger::try_with_env_or_str(&param.general.log_level)
        .expect("could not build the logger");
    let logger = if param.general.log_base.is_empty() {
        logger.log_to_stdout()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix),
            )
            .duplicate_to_stderr(Duplicate::Warn)
    };
    let _logger_handle = logger.start().expect("could not start the logger");

    // SIGINT/SIGTERM request a cooperative stop at the next checkpoint
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            error!("Could not register signal handler: {e}");
        }
    }

    info!("Starting evolution from [{param_file}].");
    let record = run(&param, shutdown);
    info!(
        "Evolution finished after {} generations in {:.2}s.",
        record.generations.len(),
        record.execution_time
    );

    if !param.general.save_run.is_empty() {
        match record.save_json(&param.general.save_run) {
            Ok(()) => info!("Run record saved to [{}].", param.general.save_run),
            Err(e) => error!("Could not save run record: {e}"),
        }
    }
}
