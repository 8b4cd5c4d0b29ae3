use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use is_terminal::IsTerminal;
use kube::runtime::events::Recorder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use controller::*;

fn main() {
    use clap::{
        Arg, Command, ValueHint, crate_authors, crate_description, crate_name, crate_version,
    };
    use std::process;
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([Command::new("run").about("run the controller").args([
            Arg::new("introspection_address")
                .long("introspection-bind-address")
                .help("address to bind for the HTTP introspection server")
                .default_value("[::]:8089"),
            Arg::new("webhook_address")
                .long("webhook-bind-address")
                .help("address to bind for the HTTP webhook server")
                .long_help(concat!(
                    "Address to bind for the HTTP webhook server.\n",
                    "If there's a TLS certificate and key at the files specified by ",
                    "`cert-dir`, `cert-name`, and `key-name` then HTTPS will be served."
                ))
                .default_value("[::]:8080"),
            Arg::new("cert_dir")
                .long("cert-dir")
                .help("directory containing TLS cert+key pair")
                .value_hint(ValueHint::DirPath)
                .default_value(
                    std::env::temp_dir()
                        .join("k8s-webhook-server/serving-certs")
                        .into_os_string(),
                ),
            Arg::new("cert_name")
                .long("cert-name")
                .help("file inside `cert-dir` containing the TLS certificate")
                .default_value("tls.crt"),
            Arg::new("key_name")
                .long("key-name")
                .help("file inside `cert-dir` containing the TLS certificate key")
                .default_value("tls.key"),
            Arg::new("namespace")
                .long("namespace")
                .env("CONTROLLER_NAMESPACE")
                .help("namespace the operator runs in; admitted by generated NetworkPolicies")
                .default_value("llama-stack-operator"),
            Arg::new("image_overrides")
                .long("image-overrides")
                .help("name of the ConfigMap overlaying the distribution registry")
                .default_value(image_overrides::DEFAULT_CONFIG_MAP),
        ])]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("run", m)) => match Args::try_from(m) {
            Ok(args) => startup(args),
            Err(e) => Err(Error::from(e)),
        },
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct Args {
    cert_dir: PathBuf,
    cert_name: String,
    image_overrides: String,
    introspection_address: SocketAddr,
    key_name: String,
    namespace: String,
    webhook_address: SocketAddr,
}

impl TryFrom<&clap::ArgMatches> for Args {
    type Error = std::net::AddrParseError;

    fn try_from(m: &clap::ArgMatches) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            webhook_address: m.get_one::<String>("webhook_address").unwrap().parse()?,
            introspection_address: m
                .get_one::<String>("introspection_address")
                .unwrap()
                .parse()?,
            cert_dir: m.get_one::<String>("cert_dir").unwrap().into(),
            cert_name: m.get_one::<String>("cert_name").unwrap().into(),
            key_name: m.get_one::<String>("key_name").unwrap().into(),
            namespace: m.get_one::<String>("namespace").unwrap().clone(),
            image_overrides: m.get_one::<String>("image_overrides").unwrap().clone(),
        })
    }
}

fn startup(args: Args) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        })
        .with(if std::io::stdout().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json())
        });
    tracing::subscriber::set_global_default(collector)?;
    let prom = PrometheusBuilder::new().with_http_listener(args.introspection_address);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let token = CancellationToken::new();
    rt.handle().spawn(async move {
        if let Err(e) = prom.install() {
            error!("error setting up prometheus endpoint: {e}");
        }
    });
    let stop = token.clone();
    rt.handle().spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("error reading SIGTERM: {err}");
        }
        stop.cancel();
    });
    rt.block_on(run(args, token))
}

async fn run(args: Args, token: CancellationToken) -> Result<()> {
    use tokio::task;

    let config = kube::Config::infer().await?;
    let client = kube::client::ClientBuilder::try_from(config)?.build();

    let registry = Arc::new(
        image_overrides::load(&client, &args.namespace, &args.image_overrides).await?,
    );
    let base = Arc::new(llsd_config::BaseResolver::embedded_only());
    let ctx = Arc::new(Context {
        client: client.clone(),
        recorder: Recorder::new(client.clone(), REPORTER.clone()),
        registry: registry.clone(),
        base: base.clone(),
        namespace: args.namespace.clone(),
        metrics: metrics::Metrics::default(),
    });

    info!(namespace = args.namespace, "setup done, starting controller");
    let mut tasks = task::JoinSet::new();
    tasks.spawn(webhooks(
        args.webhook_address,
        args.cert_dir.join(&args.cert_name),
        args.cert_dir.join(&args.key_name),
        client,
        registry,
        base,
        token.clone(),
    ));
    tasks.spawn(distributions::controller(token.clone(), ctx)?);
    while let Some(res) = tasks.join_next().await {
        match res {
            Err(e) => error!("error starting task: {e}"),
            Ok(res) => {
                if let Err(e) = res {
                    error!("error from task: {e}");
                    token.cancel();
                }
            }
        };
    }
    Ok(())
}

async fn webhooks<A, Pa, Pb>(
    addr: A,
    certfile: Pa,
    keyfile: Pb,
    client: kube::Client,
    registry: Arc<llsd_config::Registry>,
    base: Arc<llsd_config::BaseResolver>,
    cancel: CancellationToken,
) -> Result<()>
where
    A: Into<SocketAddr> + Send + 'static,
    Pa: AsRef<Path> + Send + 'static,
    Pb: AsRef<Path> + Send + 'static,
{
    use axum_server::{Handle, tls_openssl::OpenSSLConfig};

    let certfile = certfile.as_ref();
    let keyfile = keyfile.as_ref();
    let addr = addr.into();

    let app = webhook::app(webhook::State::new(client, registry, base));
    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(5)));
    });
    info!(%addr, "starting webhook server");
    if certfile.exists() && keyfile.exists() {
        let config = OpenSSLConfig::from_pem_file(certfile, keyfile)
            .map_err(|err| Error::Webhook(err.to_string()))?;
        axum_server::bind_openssl(addr, config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}
