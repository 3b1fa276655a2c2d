#[macro_use]
extern crate tracing;

mod cli;
mod run;

use std::process::ExitCode;

use structopt::StructOpt;

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let opt = cli::Opt::from_args();

	match run::run(opt).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::from(2)
		}
	}
}
