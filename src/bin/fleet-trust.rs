//! Fleet Trust CLI: operator tooling for attestation and sealed node keys
//!
//! Commands:
//!   fleet-trust challenge   issue a challenge for an address
//!   fleet-trust verify      verify a report offline against a policy
//!   fleet-trust seal        seal a file under a node's primary key
//!   fleet-trust unseal      unseal a file sealed for a node
//!   fleet-trust volumes     list a node's stored volume key sets
//!   fleet-trust demo        run the end-to-end flow in memory
//!   fleet-trust config      print the effective configuration

use fleet_trust::attest::{verify_report, ComponentMeasurement};
use fleet_trust::{
    AttestationReport, FileSecretStore, MemorySecretStore, NodeKeyVault, Policy, QuoteSigner,
    SecretStore, TrustConfig, TrustService, Verdict,
};
use std::collections::BTreeMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        Fleet Trust v0.1 — Node Attestation & Sealing         ║
╚══════════════════════════════════════════════════════════════╝

Usage: fleet-trust <command> [options]

Commands:
  challenge <addr>                                 Issue a challenge bound to <addr>
  verify    <report.json> <policy.json> <hex>      Verify a report against a policy
  seal      <node-uuid> <in> <out>                 Seal a file under the node key
  unseal    <node-uuid> <in> <out>                 Unseal a file sealed for the node
  volumes   <node-uuid>                            List stored volume key sets
  demo                                             Run the end-to-end demo
  config                                           Print effective configuration

Environment:
  FLEET_TRUST_CHALLENGE_TTL, FLEET_TRUST_SWEEP_INTERVAL,
  FLEET_TRUST_SECRET_PREFIX, FLEET_TRUST_STORE_DIR

Examples:
  fleet-trust challenge 203.0.113.5
  fleet-trust verify report.json policy.json 9f2c...
  fleet-trust seal 6f1c1d2e-8a4b-4c3d-9e5f-0a1b2c3d4e5f disk.key disk.key.sealed
  fleet-trust demo
"#
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let config = match TrustConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("  {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match args[1].as_str() {
        "challenge" => cmd_challenge(&config, &args[2..]).await,
        "verify" => cmd_verify(&args[2..]),
        "seal" => cmd_seal(&config, &args[2..]),
        "unseal" => cmd_unseal(&config, &args[2..]),
        "volumes" => cmd_volumes(&config, &args[2..]),
        "demo" => cmd_demo(&config).await,
        "config" => cmd_config(&config),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Err(String::new())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !e.is_empty() {
                eprintln!("  Error: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}

/// Vault over the on-disk secret store
fn open_vault(config: &TrustConfig) -> Result<NodeKeyVault, String> {
    let store = FileSecretStore::open(&config.store_dir).map_err(|e| e.to_string())?;
    Ok(NodeKeyVault::new(Arc::new(store), config.secret_prefix.clone()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    serde_json::from_str(&json).map_err(|e| format!("{}: {}", path, e))
}

fn print_verdict(verdict: &Verdict) {
    match verdict {
        Verdict::Trusted => println!("  Verdict: TRUSTED"),
        Verdict::Untrusted { mismatches } => {
            println!("  Verdict: UNTRUSTED ({} failed check(s))", mismatches.len());
            for m in mismatches {
                println!("    - {}", m.describe());
            }
        }
    }
}

async fn cmd_challenge(config: &TrustConfig, args: &[String]) -> Result<(), String> {
    let Some(addr) = args.first() else {
        return Err("Usage: fleet-trust challenge <addr>".into());
    };
    let service = TrustService::from_config(config, Arc::new(MemorySecretStore::new()));
    let challenge = service.issue_challenge(addr).await.map_err(|e| e.to_string())?;

    println!("\n  Challenge:  {}", challenge.value);
    println!("  Bound to:   {}", challenge.bound_address);
    println!("  Expires at: {}", challenge.expires_at.to_rfc3339());
    Ok(())
}

fn cmd_verify(args: &[String]) -> Result<(), String> {
    if args.len() < 3 {
        return Err("Usage: fleet-trust verify <report.json> <policy.json> <challenge-hex>".into());
    }
    let report: AttestationReport = read_json(&args[0])?;
    let policy: Policy = read_json(&args[1])?;
    let challenge = hex::decode(args[2].trim()).map_err(|e| format!("challenge: {}", e))?;

    let verdict = verify_report(&report, &policy, &challenge)
        .map_err(|e| format!("{} ({})", e, e.kind()))?;
    print_verdict(&verdict);
    Ok(())
}

fn cmd_seal(config: &TrustConfig, args: &[String]) -> Result<(), String> {
    if args.len() < 3 {
        return Err("Usage: fleet-trust seal <node-uuid> <in> <out>".into());
    }
    let vault = open_vault(config)?;
    let plaintext = std::fs::read(&args[1]).map_err(|e| format!("{}: {}", args[1], e))?;
    let sealed = vault.seal(&args[0], &plaintext).map_err(|e| e.to_string())?;
    std::fs::write(&args[2], &sealed).map_err(|e| format!("{}: {}", args[2], e))?;

    println!("\n  Sealed {} bytes for node {} -> {}", plaintext.len(), args[0], args[2]);
    Ok(())
}

fn cmd_unseal(config: &TrustConfig, args: &[String]) -> Result<(), String> {
    if args.len() < 3 {
        return Err("Usage: fleet-trust unseal <node-uuid> <in> <out>".into());
    }
    let vault = open_vault(config)?;
    let sealed = std::fs::read(&args[1]).map_err(|e| format!("{}: {}", args[1], e))?;
    let plaintext = vault.unseal(&args[0], &sealed).map_err(|e| e.to_string())?;
    std::fs::write(&args[2], &plaintext).map_err(|e| format!("{}: {}", args[2], e))?;

    println!("\n  Unsealed {} bytes for node {} -> {}", plaintext.len(), args[0], args[2]);
    Ok(())
}

fn cmd_volumes(config: &TrustConfig, args: &[String]) -> Result<(), String> {
    let Some(node) = args.first() else {
        return Err("Usage: fleet-trust volumes <node-uuid>".into());
    };
    let vault = open_vault(config)?;
    let mut sets = vault.volume_key_sets(node).map_err(|e| e.to_string())?;
    if sets.is_empty() {
        println!("\n  No volume key sets for node {}", node);
        return Ok(());
    }
    sets.sort_by(|a, b| a.prefix.cmp(&b.prefix));

    println!("\n  Volume key sets ({}):", sets.len());
    for set in &sets {
        println!("    {:<24} {} sealed bytes", set.prefix, set.sealed_payload.len());
    }
    Ok(())
}

fn cmd_config(config: &TrustConfig) -> Result<(), String> {
    let json = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn cmd_demo(config: &TrustConfig) -> Result<(), String> {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              Fleet Trust — End-to-End Demo                   ║
║       Challenge + Quote Verification + Sealed Keys           ║
╚══════════════════════════════════════════════════════════════╝
"#
    );

    let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let service = TrustService::from_config(config, store);
    let sweeper = service.start_sweeper(config.sweep_interval());
    let caller = "203.0.113.5";
    let node = uuid::Uuid::new_v4().to_string();

    // Step 1: attestation key and expected state
    println!("Step 1: Node attestation key and policy...");
    println!("{}", "-".repeat(60));
    let signer = QuoteSigner::generate();
    let golden = "aa".repeat(32);
    let pcrs: BTreeMap<u32, String> = [(0u32, golden.clone())].into_iter().collect();
    let policy = Policy::default()
        .require_pcr(0, golden.clone())
        .require_component("kernel", "cd".repeat(32));
    println!("  Node:   {}", node);
    println!("  Policy: PCR 0 + component 'kernel'");

    // Step 2: challenge
    println!("\nStep 2: Issuing challenge for {}...", caller);
    println!("{}", "-".repeat(60));
    let challenge = service.issue_challenge(caller).await.map_err(|e| e.to_string())?;
    println!("  Challenge {}... expires {}", &challenge.value[..8], challenge.expires_at.to_rfc3339());

    // Step 3: quote + verify
    println!("\nStep 3: Signing quote and verifying trust...");
    println!("{}", "-".repeat(60));
    let raw = challenge.raw().ok_or("challenge is not hex")?;
    let components = vec![ComponentMeasurement::new("kernel", "cd".repeat(32))];
    let report = signer
        .attest(&raw, &pcrs, components.clone())
        .map_err(|e| e.to_string())?;
    let verdict = service
        .verify_trust(caller, &challenge.value, &report, &policy)
        .await
        .map_err(|e| e.to_string())?;
    print_verdict(&verdict);

    // Step 4: replay
    println!("\nStep 4: Replaying the same challenge...");
    println!("{}", "-".repeat(60));
    match service.verify_trust(caller, &challenge.value, &report, &policy).await {
        Ok(_) => println!("  Unexpectedly accepted"),
        Err(e) => println!("  Rejected: {} (status {})", e.kind(), e.http_status()),
    }

    // Step 5: a node in a different state
    println!("\nStep 5: Node with a different PCR 0...");
    println!("{}", "-".repeat(60));
    let challenge = service.issue_challenge(caller).await.map_err(|e| e.to_string())?;
    let raw = challenge.raw().ok_or("challenge is not hex")?;
    let drifted: BTreeMap<u32, String> = [(0u32, format!("b{}", &golden[1..]))].into_iter().collect();
    let report = signer.attest(&raw, &drifted, components).map_err(|e| e.to_string())?;
    let verdict = service
        .verify_trust(caller, &challenge.value, &report, &policy)
        .await
        .map_err(|e| e.to_string())?;
    print_verdict(&verdict);

    // Step 6: sealing
    println!("\nStep 6: Sealing disk keys...");
    println!("{}", "-".repeat(60));
    let sealed = service
        .seal_node_secret(&node, b"primary disk key")
        .map_err(|e| e.to_string())?;
    let opened = service.unseal_node_secret(&node, &sealed).map_err(|e| e.to_string())?;
    println!("  Node key:  {} sealed bytes, round trip ok={}", sealed.len(), opened == b"primary disk key");

    for prefix in ["root", "data"] {
        service
            .seal_volume_secret(&node, caller, prefix, format!("{} passphrase", prefix).as_bytes())
            .map_err(|e| e.to_string())?;
    }
    let volumes = service.unseal_volume_secrets(&node, caller).map_err(|e| e.to_string())?;
    println!("  Volumes:   {:?}", volumes.keys().collect::<Vec<_>>());
    match service.unseal_volume_secrets(&node, "198.51.100.9") {
        Ok(_) => println!("  Other caller unexpectedly opened volumes"),
        Err(e) => println!("  Other caller rejected: {}", e.kind()),
    }

    sweeper.abort();
    println!("\nDemo complete.");
    Ok(())
}
