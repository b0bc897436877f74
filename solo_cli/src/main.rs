#![allow(renamed_and_removed_lints)]

extern crate clap;
extern crate loggerv;
extern crate failure;

extern crate solo;

use std::process;
use std::sync::Arc;

use clap::{App as Cli, AppSettings, Arg, ArgMatches, SubCommand};

use solo::app::App;
use solo::settings::Settings;
use solo::Result;

fn build_cli<'a, 'b>() -> Cli<'a, 'b> {
    Cli::new("solo")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-cluster deployment orchestrator for consensus ledgers")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Increase verbosity"),
        )
        .arg(
            Arg::with_name("deployment")
                .long("deployment")
                .takes_value(true)
                .global(true)
                .help("Deployment name"),
        )
        .arg(
            Arg::with_name("namespace")
                .long("namespace")
                .takes_value(true)
                .global(true)
                .help("Kubernetes namespace"),
        )
        .arg(
            Arg::with_name("cluster-ref")
                .long("cluster-ref")
                .takes_value(true)
                .global(true)
                .help("Cluster reference"),
        )
        .arg(
            Arg::with_name("context")
                .long("context")
                .takes_value(true)
                .global(true)
                .help("Kube context name"),
        )
        .arg(
            Arg::with_name("node-aliases-unparsed")
                .long("node-aliases-unparsed")
                .alias("node-aliases")
                .takes_value(true)
                .global(true)
                .help("Comma separated consensus node aliases"),
        )
        .arg(
            Arg::with_name("release-tag")
                .long("release-tag")
                .takes_value(true)
                .global(true)
                .help("Consensus node release tag"),
        )
        .arg(
            Arg::with_name("cache-dir")
                .long("cache-dir")
                .takes_value(true)
                .global(true)
                .help("Cache directory override"),
        )
        .arg(
            Arg::with_name("chart-directory")
                .long("chart-directory")
                .takes_value(true)
                .global(true)
                .help("Local chart directory override"),
        )
        .arg(
            Arg::with_name("user-email")
                .long("user-email")
                .takes_value(true)
                .global(true)
                .help("User email address for the local config"),
        )
        .arg(
            Arg::with_name("account-id")
                .long("account-id")
                .takes_value(true)
                .global(true)
                .help("Ledger account id"),
        )
        .arg(
            Arg::with_name("initial-balance")
                .long("initial-balance")
                .takes_value(true)
                .global(true)
                .help("Initial account balance"),
        )
        .arg(
            Arg::with_name("memo")
                .long("memo")
                .takes_value(true)
                .global(true)
                .help("Account memo"),
        )
        .arg(
            Arg::with_name("force")
                .long("force")
                .global(true)
                .help("Never prompt, assume defaults"),
        )
        .arg(
            Arg::with_name("quiet")
                .long("quiet")
                .short("q")
                .global(true)
                .help("Never prompt, fail when input is needed"),
        )
        .arg(
            Arg::with_name("dev")
                .long("dev")
                .global(true)
                .help("Developer mode: mocked ledger, full error chains"),
        )
        .subcommand(SubCommand::with_name("init").about("Initialize the solo home and user config"))
        .subcommand(
            SubCommand::with_name("cluster")
                .about("Cluster reference management")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("connect").about("Register a kube context"))
                .subcommand(SubCommand::with_name("list").about("List cluster references"))
                .subcommand(SubCommand::with_name("info").about("Show one cluster reference"))
                .subcommand(SubCommand::with_name("setup").about("Install shared cluster resources"))
                .subcommand(SubCommand::with_name("reset").about("Remove shared cluster resources")),
        )
        .subcommand(
            SubCommand::with_name("deployment")
                .about("Deployment bookkeeping")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("create").about("Create a deployment"))
                .subcommand(SubCommand::with_name("add-cluster").about("Attach a cluster"))
                .subcommand(SubCommand::with_name("list").about("List deployments")),
        )
        .subcommand(
            SubCommand::with_name("network")
                .about("Consensus network lifecycle")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("deploy").about("Deploy the network chart"))
                .subcommand(SubCommand::with_name("destroy").about("Destroy the network")),
        )
        .subcommand(
            SubCommand::with_name("node")
                .about("Consensus node lifecycle")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("keys").about("Stage node signing keys"))
                .subcommand(SubCommand::with_name("setup").about("Stage and upload node artifacts"))
                .subcommand(SubCommand::with_name("start").about("Start consensus nodes"))
                .subcommand(SubCommand::with_name("stop").about("Stop consensus nodes"))
                .subcommand(SubCommand::with_name("restart").about("Restart consensus nodes"))
                .subcommand(SubCommand::with_name("refresh").about("Bounce consensus node pods"))
                .subcommand(SubCommand::with_name("add").about("Add consensus nodes"))
                .subcommand(SubCommand::with_name("delete").about("Delete consensus nodes"))
                .subcommand(SubCommand::with_name("update").about("Update node metadata"))
                .subcommand(SubCommand::with_name("upgrade").about("Freeze and upgrade the network"))
                .subcommand(SubCommand::with_name("logs").about("Download node logs"))
                .subcommand(SubCommand::with_name("states").about("Snapshot node pod states"))
                .subcommand(
                    SubCommand::with_name("download-generated-files")
                        .about("Download generated node artifacts"),
                ),
        )
        .subcommand(
            SubCommand::with_name("account")
                .about("Ledger account operations")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("init").about("Initialize the operator account"))
                .subcommand(SubCommand::with_name("create").about("Create an account"))
                .subcommand(SubCommand::with_name("update").about("Update an account"))
                .subcommand(SubCommand::with_name("get").about("Query an account")),
        )
        .subcommand(
            SubCommand::with_name("mirror-node")
                .about("Mirror node sidecar")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("deploy").about("Deploy the mirror node"))
                .subcommand(SubCommand::with_name("destroy").about("Destroy the mirror node")),
        )
        .subcommand(
            SubCommand::with_name("explorer")
                .about("Explorer sidecar")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("deploy").about("Deploy the explorer"))
                .subcommand(SubCommand::with_name("destroy").about("Destroy the explorer")),
        )
        .subcommand(
            SubCommand::with_name("relay")
                .about("JSON-RPC relay sidecar")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("deploy").about("Deploy the relay"))
                .subcommand(SubCommand::with_name("destroy").about("Destroy the relay")),
        )
        .subcommand(
            SubCommand::with_name("context")
                .about("Kube context management")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("connect").about("Re-point a cluster reference")),
        )
}

fn dispatch(app: &Arc<App>, matches: &ArgMatches) -> (String, Result<()>) {
    let (group, group_matches) = matches.subcommand();
    let sub = group_matches
        .and_then(|m| m.subcommand_name())
        .unwrap_or("");
    let path = if sub.is_empty() {
        group.to_string()
    } else {
        format!("{} {}", group, sub)
    };

    let outcome = match (group, sub) {
        ("init", _) => solo::init::run(app),
        ("cluster", "connect") => solo::cluster::connect(app),
        ("cluster", "list") => solo::cluster::list(app),
        ("cluster", "info") => solo::cluster::info(app),
        ("cluster", "setup") => solo::cluster::setup(app),
        ("cluster", "reset") => solo::cluster::reset(app),
        ("deployment", "create") => solo::deployment::create(app),
        ("deployment", "add-cluster") => solo::deployment::add_cluster(app),
        ("deployment", "list") => solo::deployment::list(app),
        ("network", "deploy") => solo::network::deploy(app),
        ("network", "destroy") => solo::network::destroy(app),
        ("node", "keys") => solo::node::keys(app),
        ("node", "setup") => solo::node::setup(app),
        ("node", "start") => solo::node::start(app),
        ("node", "stop") => solo::node::stop(app),
        ("node", "restart") => solo::node::restart(app),
        ("node", "refresh") => solo::node::refresh(app),
        ("node", "add") => solo::node::add(app),
        ("node", "delete") => solo::node::delete(app),
        ("node", "update") => solo::node::update(app),
        ("node", "upgrade") => solo::node::upgrade(app),
        ("node", "logs") => solo::node::logs(app),
        ("node", "states") => solo::node::states(app),
        ("node", "download-generated-files") => solo::node::download_generated_files(app),
        ("account", "init") => solo::account::init(app),
        ("account", "create") => solo::account::create(app),
        ("account", "update") => solo::account::update(app),
        ("account", "get") => solo::account::get(app),
        ("mirror-node", "deploy") => solo::addons::mirror_deploy(app),
        ("mirror-node", "destroy") => solo::addons::mirror_destroy(app),
        ("explorer", "deploy") => solo::addons::explorer_deploy(app),
        ("explorer", "destroy") => solo::addons::explorer_destroy(app),
        ("relay", "deploy") => solo::addons::relay_deploy(app),
        ("relay", "destroy") => solo::addons::relay_destroy(app),
        ("context", "connect") => solo::context::connect(app),
        _ => Err(failure::format_err!("unknown command '{}'", path)),
    };
    (path, outcome)
}

fn print_error(err: &failure::Error, dev: bool) {
    if dev {
        // full cause chain with backtraces for developers
        eprintln!("{:?}", err);
        return;
    }
    let banner = "********************************************";
    eprintln!("{}", banner);
    for cause in err.iter_chain() {
        eprintln!("* {}", cause);
    }
    eprintln!("{}", banner);
}

fn main() {
    let matches = build_cli().get_matches();
    loggerv::init_with_verbosity(matches.occurrences_of("verbose") + 1).unwrap();

    if let Err(e) = solo::init() {
        eprintln!("failed to prepare the solo home: {}", e);
        process::exit(1);
    }

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    // argv wins over environment and files
    if let Err(e) = merge_all_argv(&settings, &matches) {
        eprintln!("failed to merge flags: {}", e);
        process::exit(1);
    }

    let app = match App::new(settings) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            print_error(&e, matches.is_present("dev"));
            process::exit(1);
        }
    };

    let (path, outcome) = dispatch(&app, &matches);
    let dev = app.settings.is_dev();
    app.shutdown();

    match outcome {
        Ok(()) => process::exit(0),
        Err(e) => {
            let wrapped = failure::Error::from(e.context(format!("Error running {}", path)));
            print_error(&wrapped, dev);
            process::exit(1);
        }
    }
}

/// Merge globals from the top level and every nested subcommand level.
fn merge_all_argv(settings: &Settings, matches: &ArgMatches) -> Result<()> {
    settings.merge_argv(matches)?;
    let mut current = matches;
    while let (_, Some(inner)) = current.subcommand() {
        settings.merge_argv(inner)?;
        current = inner;
    }
    Ok(())
}
