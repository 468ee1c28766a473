use clap::{Arg, ArgMatches, Command};
use mailproxy::config::{load_config_or_default, Config};
use mailproxy::dispatch::ActionPlan;
use mailproxy::logging;
use mailproxy::proxy::{self, Invocation};
use mailproxy::Envelope;
use std::io::Read;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("mailproxy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Outbound mail filter holding back spoofed mail from privileged identities")
        .long_about(
            "Invoked by the MTA once per outbound message, with the envelope sender and\n\
             recipients as arguments and the raw message on stdin. Messages whose From header\n\
             claims a privileged account in a protected domain while the envelope sender\n\
             disagrees are held back, archived and reported. Everything else is delivered.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mailproxy.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a sample configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Check the configuration and print a summary")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .value_name("FILE")
                .help("Evaluate a message file against the policy without delivering anything")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("exit-status")
                .long("exit-status")
                .help("Exit with distinct codes for blocked messages and errors")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sender")
                .value_name("SENDER")
                .help("Envelope sender")
                .allow_hyphen_values(true)
                .index(1),
        )
        .arg(
            Arg::new("recipients")
                .value_name("RECIPIENT")
                .help("Envelope recipients")
                .num_args(0..)
                .allow_hyphen_values(true)
                .index(2),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_default();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    if matches.get_flag("test-config") {
        logging::init_console_logger(verbose);
        test_config(&config_path);
        return;
    }

    let envelope = envelope_from_args(&matches);

    if let Some(message_file) = matches.get_one::<String>("check") {
        logging::init_console_logger(verbose);
        check_message(&config_path, envelope, message_file);
        return;
    }

    let mut raw = Vec::new();
    let read_error = std::io::stdin().read_to_end(&mut raw).err();
    let exit_status = matches.get_flag("exit-status");
    let code = proxy::filter(&config_path, envelope, raw, read_error, verbose, exit_status).await;
    process::exit(code);
}

fn envelope_from_args(matches: &ArgMatches) -> Envelope {
    let sender = matches
        .get_one::<String>("sender")
        .cloned()
        .unwrap_or_default();
    let recipients = matches
        .get_many::<String>("recipients")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    Envelope::new(sender, recipients)
}

fn generate_default_config(path: &str) {
    match Config::sample().to_file(path) {
        Ok(()) => {
            println!("Sample configuration written to: {path}");
            println!("Please edit the policy lists and notification addresses before use.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(path: &str) {
    println!("🔍 Testing configuration {path}...");
    if !std::path::Path::new(path).exists() {
        println!("❌ Configuration file not found");
        process::exit(1);
    }
    let config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            println!("❌ Configuration invalid: {e}");
            process::exit(1);
        }
    };

    let policy = &config.policy;
    println!("Protected domains: {}", policy.protected_domains.join(", "));
    println!("Whitelisted domains: {}", policy.whitelisted_domains.join(", "));
    println!("Privileged users: {}", policy.privileged_users.join(", "));
    println!("Archive directory: {}", config.spool.archive_path().display());
    println!("Log file: {}", config.spool.log_path().display());
    println!("Relay: {}", config.relay.sendmail_path);
    println!("Notifications: {} -> {}", config.notification.from, config.notification.to);
    if config.reporting.enabled {
        println!("Incident reporting: {}", config.reporting.endpoint);
    } else {
        println!("Incident reporting: disabled");
    }
    if config.statistics.enabled {
        println!("Statistics: {}", config.statistics.endpoint);
    }
    if config.shadow_mode {
        println!("⚠️  Shadow mode: blocked messages are still delivered");
    }

    let warnings = config.warnings();
    if warnings.is_empty() {
        println!("✅ Configuration OK");
    } else {
        for warning in &warnings {
            println!("⚠️  {warning}");
        }
        println!("✅ Configuration loaded with {} warning(s)", warnings.len());
    }
}

fn check_message(config_path: &str, envelope: Envelope, message_file: &str) {
    let config = load_config_or_default(config_path);
    let raw = match std::fs::read(message_file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("❌ Error reading message file: {e}");
            process::exit(1);
        }
    };

    let invocation = Invocation::new(config, envelope, raw);
    let evaluation = invocation.evaluate();

    println!("🧪 Checking message file: {message_file}");
    println!("   Envelope sender: {}", invocation.envelope.sender);
    println!("   Recipients: {}", invocation.envelope.recipient_list());
    println!("   From header: {}", evaluation.header_sender);
    if let Some(ids) = &evaluation.identities {
        println!("   Normalized envelope: {}", ids.envelope);
        println!("   Normalized header: {}", ids.header);
    }
    let trace = &evaluation.trace;
    if let Some(protected) = trace.protected_domain {
        println!("   Protected domain: {protected}");
    }
    if let Some(privileged) = trace.privileged_user {
        println!("   Privileged user: {privileged}");
    }
    if let Some(differ) = trace.identities_differ {
        println!("   Identities differ: {differ}");
    }
    println!();

    match &evaluation.outcome {
        mailproxy::Outcome::Failed(e) => println!("Result: ERROR ({e})"),
        outcome => println!("Result: {}", outcome.label()),
    }
    let plan = ActionPlan::for_outcome(&evaluation.outcome, invocation.config.shadow_mode);
    println!("Actions: {plan}");
}
