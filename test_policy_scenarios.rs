use mailproxy::config::load_config_or_default;
use mailproxy::{Envelope, Outcome};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/mailproxy.yaml".to_string());
    let config = load_config_or_default(&path);
    let policy = config.policy_lists();

    println!("🧪 Testing policy scenarios against {path}");

    let protected = policy
        .protected_domains()
        .next()
        .unwrap_or("corp.example")
        .to_string();
    let privileged = policy
        .privileged_users()
        .next()
        .unwrap_or("svc-billing")
        .to_string();
    let whitelisted = policy.whitelisted_domains().next().map(str::to_string);

    let service = format!("{privileged}@{protected}");
    let mut scenarios = vec![
        (
            "spoofed privileged sender",
            "attacker@evil.example".to_string(),
            format!("From: {service}\n\nbody\n"),
            "BLOCKED",
        ),
        (
            "matching privileged sender",
            service.clone(),
            format!("From: \"Service\" <{service}>\n\nbody\n"),
            "PASSED",
        ),
        (
            "missing From header",
            service.clone(),
            "Subject: none\n\nbody\n".to_string(),
            "ERROR",
        ),
        (
            "From without address",
            "attacker@evil.example".to_string(),
            "From: <bad-format-no-at-sign>\n\nbody\n".to_string(),
            "ERROR",
        ),
    ];
    if let Some(domain) = whitelisted {
        scenarios.push((
            "whitelisted relay",
            format!("alerts@{domain}"),
            format!("From: {service}\n\nbody\n"),
            "PASSED (WHITELISTED domain)",
        ));
    }

    let mut failures = 0;
    for (name, sender, raw, expected) in scenarios {
        let envelope = Envelope::new(sender, vec!["someone@partner.example".to_string()]);
        let evaluation = mailproxy::evaluate(&policy, &envelope, raw.as_bytes());
        let label = evaluation.outcome.label();
        let status = if label == expected { "✅" } else { "❌" };
        if label != expected {
            failures += 1;
        }
        match &evaluation.outcome {
            Outcome::Failed(e) => println!("{status} {name}: {label} ({e})"),
            _ => println!("{status} {name}: {label} (expected: {expected})"),
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} scenario(s) did not match");
    }
    println!("\nAll scenarios behaved as expected");
    Ok(())
}
