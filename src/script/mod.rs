//! Script generator: renders the shell payload that configures an instance.
//!
//! Rendering is pure. The same descriptor always yields byte-identical
//! output, and every step is guarded so running the payload twice leaves the
//! machine in the same state as running it once.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use shell_escape::unix::escape;

use crate::descriptor::DeploymentDescriptor;

/// Directory under which application checkouts live.
pub const WEB_ROOT: &str = "/var/www";

const HEADER: &str = "#!/usr/bin/env bash\nset -euo pipefail\nexport DEBIAN_FRONTEND=noninteractive\n";

/// Ports the host firewall always admits: SSH and the reverse proxy.
const BASE_ALLOWED: [(u16, &str); 3] = [(22, "tcp"), (80, "tcp"), (443, "tcp")];

/// Rendered shell payload. Opaque to everything except the remote side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptPayload(String);

impl ScriptPayload {
    /// Wraps already rendered text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Borrows the payload text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the payload, returning its text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ScriptPayload {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Renders the full bootstrap payload for a fresh or existing instance.
#[must_use]
pub fn render(descriptor: &DeploymentDescriptor) -> ScriptPayload {
    let app = Quoted::new(descriptor);
    let mut script = StepScript::default();

    script.step(
        "Updating system packages",
        "apt-get update -y\napt-get upgrade -y\n".to_owned(),
    );
    script.step("Installing Node.js runtime", runtime_install(descriptor));
    script.step(
        "Installing build tools and process manager",
        "apt-get install -y build-essential git curl\n\
         if ! command -v pm2 >/dev/null 2>&1; then\n  npm install -g pm2\nfi\n"
            .to_owned(),
    );
    script.step(
        "Installing nginx",
        "if ! command -v nginx >/dev/null 2>&1; then\n  apt-get install -y nginx\nfi\n\
         systemctl enable nginx\n"
            .to_owned(),
    );
    script.step("Configuring host firewall", host_firewall(descriptor));
    script.step("Fetching application source", source_fetch(&app));
    script.step(
        "Installing dependencies",
        format!("cd {dir}\nnpm install\n", dir = app.dir),
    );
    script.step(
        "Building application",
        format!("cd {dir}\nnpm run build\n", dir = app.dir),
    );
    script.step("Starting application", process_start(&app));
    script.step("Writing nginx site", nginx_site(descriptor, &app));
    script.step(
        "Reloading nginx",
        "nginx -t\nsystemctl reload nginx || systemctl restart nginx\n".to_owned(),
    );

    ScriptPayload(script.finish("Deployment complete"))
}

/// Renders the update payload: refresh the checkout, rebuild, and restart.
///
/// Assumes the instance was bootstrapped by [`render`].
#[must_use]
pub fn render_update(descriptor: &DeploymentDescriptor) -> ScriptPayload {
    let app = Quoted::new(descriptor);
    let mut script = StepScript::default();

    script.step(
        "Checking application directory",
        format!(
            "if [ ! -d {dir}/.git ]; then\n  echo \"{dir} is not a checkout; run deploy first\" >&2\n  exit 1\nfi\n",
            dir = app.dir
        ),
    );
    script.step("Fetching application source", source_fetch(&app));
    script.step(
        "Installing dependencies",
        format!("cd {dir}\nnpm install\n", dir = app.dir),
    );
    script.step(
        "Building application",
        format!("cd {dir}\nnpm run build\n", dir = app.dir),
    );
    script.step("Restarting application", process_start(&app));

    ScriptPayload(script.finish("Update complete"))
}

/// Shell-quoted values shared by several steps.
struct Quoted {
    name: String,
    dir: String,
    repo: String,
    branch: String,
    remote_branch: String,
    port: u16,
}

impl Quoted {
    fn new(descriptor: &DeploymentDescriptor) -> Self {
        let application = descriptor.application();
        Self {
            name: quote(&application.name),
            dir: quote(&format!("{WEB_ROOT}/{}", application.name)),
            repo: quote(&application.repo_url),
            branch: quote(&application.branch),
            remote_branch: quote(&format!("origin/{}", application.branch)),
            port: application.port,
        }
    }
}

fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Accumulates numbered steps so each marker carries the final total.
#[derive(Default)]
struct StepScript {
    steps: Vec<(&'static str, String)>,
}

impl StepScript {
    fn step(&mut self, label: &'static str, body: String) {
        self.steps.push((label, body));
    }

    fn finish(self, closing: &str) -> String {
        let total = self.steps.len();
        let mut out = String::from(HEADER);
        for (index, (label, body)) in self.steps.into_iter().enumerate() {
            out.push_str(&format!(
                "\necho \"[{}/{total}] {label}\"\n{body}",
                index + 1
            ));
        }
        out.push_str(&format!("\necho \"{closing}\"\n"));
        out
    }
}

fn runtime_install(descriptor: &DeploymentDescriptor) -> String {
    let major = quote(&format!("v{}", descriptor.runtime_version()));
    let setup_url = quote(&format!(
        "https://deb.nodesource.com/setup_{}.x",
        descriptor.runtime_version()
    ));
    format!(
        "if ! command -v node >/dev/null 2>&1 || [ \"$(node -v | cut -d. -f1)\" != {major} ]; then\n  \
         curl -fsSL {setup_url} | bash -\n  \
         apt-get install -y nodejs\n\
         fi\n"
    )
}

fn host_firewall(descriptor: &DeploymentDescriptor) -> String {
    let mut allowed: BTreeSet<(u16, String)> = BASE_ALLOWED
        .iter()
        .map(|(port, protocol)| (*port, (*protocol).to_owned()))
        .collect();
    allowed.insert((descriptor.application().port, String::from("tcp")));
    allowed.extend(
        descriptor
            .firewall_rule_specs()
            .iter()
            .map(|rule| (rule.port, rule.protocol.clone())),
    );

    let mut body = String::from(
        "if ! command -v ufw >/dev/null 2>&1; then\n  apt-get install -y ufw\nfi\n",
    );
    for (port, protocol) in &allowed {
        body.push_str(&format!("ufw allow {port}/{protocol}\n"));
    }
    body.push_str("ufw --force enable\n");
    body
}

fn source_fetch(app: &Quoted) -> String {
    format!(
        "if [ -d {dir}/.git ]; then\n  \
         git -C {dir} fetch origin {branch}\n  \
         git -C {dir} checkout -f -B {branch} {remote_branch}\n  \
         git -C {dir} reset --hard {remote_branch}\n\
         else\n  \
         mkdir -p {web_root}\n  \
         git clone --branch {branch} {repo} {dir}\n\
         fi\n",
        dir = app.dir,
        branch = app.branch,
        remote_branch = app.remote_branch,
        repo = app.repo,
        web_root = WEB_ROOT,
    )
}

fn process_start(app: &Quoted) -> String {
    format!(
        "cd {dir}\n\
         if pm2 describe {name} >/dev/null 2>&1; then\n  pm2 delete {name}\nfi\n\
         PORT={port} pm2 start npm --name {name} -- start\n\
         pm2 save\n",
        dir = app.dir,
        name = app.name,
        port = app.port,
    )
}

fn nginx_site(descriptor: &DeploymentDescriptor, app: &Quoted) -> String {
    let site = quote(&format!(
        "/etc/nginx/sites-available/{}",
        descriptor.application().name
    ));
    let enabled = quote(&format!(
        "/etc/nginx/sites-enabled/{}",
        descriptor.application().name
    ));
    format!(
        "cat > {site} <<'NGINX'\n\
         server {{\n    \
         listen 80 default_server;\n    \
         server_name _;\n\n    \
         location / {{\n        \
         proxy_pass http://127.0.0.1:{port};\n        \
         proxy_http_version 1.1;\n        \
         proxy_set_header Upgrade $http_upgrade;\n        \
         proxy_set_header Connection 'upgrade';\n        \
         proxy_set_header Host $host;\n        \
         proxy_set_header X-Real-IP $remote_addr;\n        \
         proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n        \
         proxy_set_header X-Forwarded-Proto $scheme;\n        \
         proxy_cache_bypass $http_upgrade;\n    \
         }}\n\
         }}\n\
         NGINX\n\
         ln -sf {site} {enabled}\n\
         rm -f /etc/nginx/sites-enabled/default\n",
        port = app.port,
    )
}

#[cfg(test)]
mod tests;
