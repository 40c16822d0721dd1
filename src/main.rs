use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(1)),
        Err(error) => {
            eprintln!("ai-shell: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = ai_shell::Cli::parse();
    Ok(ai_shell::run(cli).await?)
}
