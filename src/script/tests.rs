//! Unit tests for the script generator.

use super::*;
use crate::descriptor::{ApplicationDescriptor, FirewallRuleSpec, MachineProfile};
use rstest::{fixture, rstest};

fn descriptor_with(application: ApplicationDescriptor) -> DeploymentDescriptor {
    DeploymentDescriptor::builder()
        .project_id("demo-project")
        .zone("us-central1-a")
        .instance_name("web-01")
        .machine(MachineProfile {
            machine_type: String::from("e2-medium"),
            image_project: String::from("ubuntu-os-cloud"),
            image_family: String::from("ubuntu-2204-lts"),
            disk_size_gb: 20,
            disk_type: String::from("pd-balanced"),
        })
        .application(application)
        .runtime_version("20")
        .firewall_rule(FirewallRuleSpec {
            name: String::from("http"),
            protocol: String::from("tcp"),
            port: 80,
        })
        .firewall_rule(FirewallRuleSpec {
            name: String::from("metrics"),
            protocol: String::from("tcp"),
            port: 9100,
        })
        .build()
        .expect("descriptor should build")
}

#[fixture]
fn descriptor() -> DeploymentDescriptor {
    descriptor_with(ApplicationDescriptor {
        name: String::from("shop"),
        repo_url: String::from("https://example.com/shop.git"),
        branch: String::from("main"),
        port: 3000,
    })
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("payload should contain {needle:?}"))
}

#[rstest]
fn render_is_deterministic(descriptor: DeploymentDescriptor) {
    assert_eq!(render(&descriptor), render(&descriptor));
    assert_eq!(render_update(&descriptor), render_update(&descriptor));
}

#[rstest]
fn render_starts_with_strict_header(descriptor: DeploymentDescriptor) {
    let payload = render(&descriptor);
    assert!(payload.as_str().starts_with("#!/usr/bin/env bash\nset -euo pipefail\n"));
}

#[rstest]
fn render_emits_markers_in_order(descriptor: DeploymentDescriptor) {
    let payload = render(&descriptor).into_string();
    let labels = [
        "[1/11] Updating system packages",
        "[2/11] Installing Node.js runtime",
        "[3/11] Installing build tools and process manager",
        "[4/11] Installing nginx",
        "[5/11] Configuring host firewall",
        "[6/11] Fetching application source",
        "[7/11] Installing dependencies",
        "[8/11] Building application",
        "[9/11] Starting application",
        "[10/11] Writing nginx site",
        "[11/11] Reloading nginx",
    ];
    let positions: Vec<usize> = labels.iter().map(|label| position(&payload, label)).collect();
    assert!(positions.is_sorted());
}

#[rstest]
fn render_guards_every_mutation(descriptor: DeploymentDescriptor) {
    let payload = render(&descriptor).into_string();
    assert!(payload.contains("if [ -d /var/www/shop/.git ]; then"));
    assert!(payload.contains("git -C /var/www/shop reset --hard origin/main"));
    assert!(payload.contains("if pm2 describe shop >/dev/null 2>&1; then\n  pm2 delete shop\nfi"));
    assert!(payload.contains("cat > /etc/nginx/sites-available/shop <<'NGINX'"));
    assert!(payload.contains("ln -sf /etc/nginx/sites-available/shop"));
    assert!(payload.contains("[ \"$(node -v | cut -d. -f1)\" != v20 ]"));
    assert!(position(&payload, "pm2 describe shop") < position(&payload, "pm2 start npm"));
}

#[rstest]
fn render_proxies_the_application_port(descriptor: DeploymentDescriptor) {
    let payload = render(&descriptor).into_string();
    assert!(payload.contains("proxy_pass http://127.0.0.1:3000;"));
    assert!(payload.contains("PORT=3000 pm2 start npm --name shop -- start"));
    assert!(payload.contains("proxy_set_header Upgrade $http_upgrade;"));
}

#[rstest]
fn render_allows_declared_and_base_ports_once(descriptor: DeploymentDescriptor) {
    let payload = render(&descriptor).into_string();
    for rule in ["22/tcp", "80/tcp", "443/tcp", "3000/tcp", "9100/tcp"] {
        let needle = format!("ufw allow {rule}\n");
        assert_eq!(payload.matches(&needle).count(), 1, "{rule} should appear once");
    }
}

#[rstest]
fn render_quotes_untrusted_values() {
    let descriptor = descriptor_with(ApplicationDescriptor {
        name: String::from("shop"),
        repo_url: String::from("https://example.com/shop.git; rm -rf /"),
        branch: String::from("feature/$(whoami)"),
        port: 3000,
    });
    let payload = render(&descriptor).into_string();
    assert!(payload.contains("'https://example.com/shop.git; rm -rf /'"));
    assert!(payload.contains("'feature/$(whoami)'"));
    assert!(payload.contains("'origin/feature/$(whoami)'"));
}

#[rstest]
fn render_update_refreshes_without_reprovisioning(descriptor: DeploymentDescriptor) {
    let payload = render_update(&descriptor).into_string();
    assert!(payload.contains("[1/5] Checking application directory"));
    assert!(payload.contains("[5/5] Restarting application"));
    assert!(payload.contains("git -C /var/www/shop fetch origin main"));
    assert!(payload.contains("npm run build"));
    assert!(!payload.contains("apt-get"));
    assert!(!payload.contains("nginx"));
}

#[rstest]
fn payload_accessors_expose_text() {
    let payload = ScriptPayload::new("echo hi\n");
    assert_eq!(payload.len(), 8);
    assert!(!payload.is_empty());
    assert_eq!(payload.to_string(), "echo hi\n");
}
