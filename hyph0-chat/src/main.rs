use clap::Parser;
use config::Config;
use tokio::runtime::Builder;

mod client;
mod config;
mod server;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(short, long, value_name = "FILE", default_value = "config.toml")]
    config: String,
    /// Run as the chat server instead of connecting as a client.
    #[clap(long)]
    serve: bool,
    /// Address to bind (server) or connect to (client), overriding the config file.
    /// Accepts `hyph0://host:port` or a bare `host:port`.
    #[clap(long)]
    addr: Option<String>,
    /// Nickname to join chat with, overriding the config file.
    #[clap(long)]
    nick: Option<String>,
}

fn main() {
    pretty_env_logger::init();

    let args = Args::parse();

    let mut config = Config::from_file(&args.config).unwrap_or_else(|err| {
        tracing::warn!("failed to load {}: {err}, using defaults", args.config);
        Config::default()
    });

    if let Some(nick) = args.nick {
        config.nick = nick;
    }
    if let Some(addr) = &args.addr {
        let parsed = match config::parse_hyph0_addr(addr) {
            Ok(a) => a,
            Err(err) => {
                tracing::error!("invalid --addr {addr}: {err}");
                return;
            }
        };
        if args.serve {
            config.bind = Some(parsed);
        } else {
            config.connect = Some(parsed);
        }
    }

    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    rt.block_on(async_main(args.serve, config));
}

async fn async_main(serve: bool, config: Config) {
    let cipher_modes = config.connection.cipher_modes.clone();

    let outcome = if serve {
        let Some(bind) = config.bind else {
            tracing::error!("--serve requires `bind` in the config file or --addr on the command line");
            return;
        };
        tokio::select! {
            result = server::serve(bind, config.connection, cipher_modes) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    } else {
        let Some(connect) = config.connect else {
            tracing::error!("connecting requires `connect` in the config file or --addr on the command line");
            return;
        };
        tokio::select! {
            result = client::run(connect, config.nick, config.connection, cipher_modes) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    };

    if let Err(err) = outcome {
        tracing::error!("exited with error: {err}");
    }
}
