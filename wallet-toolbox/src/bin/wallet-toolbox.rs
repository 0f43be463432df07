use wallet_toolbox::cli::Args;

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = argh::from_env::<Args>();
    args.run()
}
