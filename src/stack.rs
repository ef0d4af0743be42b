//! Built-in stack: a self-hosted Invidious instance
//!
//! A Postgres database and the Invidious app on a private bridge network,
//! with the database sharing the network namespace of a Tailscale sidecar.
//! Credentials come from three secrets; the app receives its whole
//! configuration as one encoded environment variable.

use converge::{
    LifecyclePolicy, Property, ResourceDescriptor, ResourceKind, Stack, StackMetadata,
};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const STACK_NAME: &str = "invidious";

/// Host-side files the containers bind-mount, relative to a project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub root: PathBuf,
}

impl HostPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths relative to the current directory
    pub fn current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    fn join(&self, relative: &str) -> String {
        path_string(&self.root.join(relative))
    }

    pub fn tailscale_state(&self) -> String {
        self.join("ts-state")
    }

    pub fn tailscale_config(&self) -> String {
        self.join("ts-config")
    }

    pub fn sql_dir(&self) -> String {
        self.join("config/sql")
    }

    pub fn db_init_script(&self) -> String {
        self.join("docker/init-invidious-db.sh")
    }
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

fn bind(source: String, target: &str) -> Property {
    Property::map([
        ("type", Property::from("bind")),
        ("source", Property::from(source)),
        ("target", Property::from(target)),
        ("read_only", Property::from(false)),
    ])
}

/// The full resource set for `stage`
///
/// The `production` stage retains every resource on teardown.
pub fn media_stack(stage: &str, paths: &HostPaths) -> Stack {
    let db_user = ResourceDescriptor::secret("DbUser");
    let db_pass = ResourceDescriptor::secret("DbPass");
    let hmac_key = ResourceDescriptor::secret("HmacKey");

    let tailnet_key = ResourceDescriptor::new("tailnetKey", ResourceKind::TailnetKey)
        .with("reusable", true)
        .with("ephemeral", true)
        .with("preauthorized", true)
        .with("expiry", 60 * 60 * 24 * 7_i64);

    let tailscale = ResourceDescriptor::container("tailscale")
        .with("name", "tailscale")
        .with("image", "tailscale/tailscale:latest")
        .with("hostname", "hometube")
        .with("restart", "unless-stopped")
        .with(
            "mounts",
            Property::list([bind("/dev/net/tun".to_string(), "/dev/net/tun")]),
        )
        .with(
            "volumes",
            Property::list([
                Property::map([
                    ("host_path", Property::from(paths.tailscale_state())),
                    ("container_path", Property::from("/var/lib/tailscale")),
                ]),
                Property::map([
                    ("host_path", Property::from(paths.tailscale_config())),
                    ("container_path", Property::from("/config")),
                ]),
            ]),
        )
        .with(
            "capabilities",
            Property::map([("adds", json!(["NET_ADMIN", "SYS_MODULE"]))]),
        )
        .with(
            "envs",
            Property::list([
                Property::interpolate([
                    Property::from("TS_AUTHKEY="),
                    tailnet_key.output("key").into(),
                ]),
                Property::from("TS_EXTRA_ARGS=--advertise-tags=tag:container"),
                Property::from("TS_SERVE_CONFIG=/config/serve.json"),
                Property::from("TS_STATE_DIR=/var/lib/tailscale"),
            ]),
        );

    let postgres_data = ResourceDescriptor::volume("postgresData").with("name", "postgresData");
    let network = ResourceDescriptor::network("invidious-network")
        .with("name", "invidious-network")
        .with("driver", "bridge");

    let db = ResourceDescriptor::container("invidious-db")
        .with("name", "invidious-db")
        .with("image", "docker.io/library/postgres:14")
        .with(
            "network_mode",
            Property::interpolate([
                Property::from("service:"),
                tailscale.output("name").into(),
            ]),
        )
        .with(
            "networks",
            Property::list([Property::map([("name", network.output("name"))])]),
        )
        .with(
            "envs",
            Property::list([
                Property::from("POSTGRES_DB=invidious"),
                Property::interpolate([
                    Property::from("POSTGRES_USER="),
                    db_user.output("value").into(),
                ]),
                Property::interpolate([
                    Property::from("POSTGRES_PASSWORD="),
                    db_pass.output("value").into(),
                ]),
            ]),
        )
        .with(
            "mounts",
            Property::list([
                bind(paths.sql_dir(), "/config/sql"),
                bind(
                    paths.db_init_script(),
                    "/docker-entrypoint-initdb.d/init-invidious-db.sh",
                ),
            ]),
        )
        .with(
            "volumes",
            Property::list([Property::map([
                ("volume_name", Property::from(postgres_data.output("name"))),
                ("container_path", Property::from("/var/lib/postgresql/data")),
            ])]),
        )
        .with(
            "healthcheck",
            Property::map([(
                "tests",
                json!(["CMD-SHELL", "pg_isready -U $$POSTGRES_USER -d $$POSTGRES_DB"]),
            )]),
        )
        .with("restart", "unless-stopped");

    let app_config = Property::map([
        (
            "db",
            Property::map([
                ("dbname", Property::from("invidious")),
                ("user", db_user.output("value").into()),
                ("password", db_pass.output("value").into()),
                ("host", db.output("host").into()),
                ("port", Property::from(5432_u16)),
            ]),
        ),
        ("check_tables", Property::from(true)),
        ("hmac_key", hmac_key.output("value").into()),
    ]);

    let app = ResourceDescriptor::container("invidious")
        .with("name", "invidious")
        .with("image", "quay.io/invidious/invidious:latest-arm64")
        .with(
            "networks",
            Property::list([Property::map([("name", network.output("name"))])]),
        )
        .with(
            "envs",
            Property::list([Property::interpolate([
                Property::from("INVIDIOUS_CONFIG="),
                Property::encoded(app_config),
            ])]),
        )
        .with(
            "ports",
            Property::list([Property::map([
                ("external", Property::from(3000_u16)),
                ("internal", Property::from(3000_u16)),
                ("ip", Property::from("127.0.0.1")),
            ])]),
        )
        .with(
            "healthcheck",
            Property::map([
                (
                    "tests",
                    json!([
                        "wget -nv --tries=1 --spider http://127.0.0.1:3000/api/v1/trending || exit 1"
                    ]),
                ),
                ("interval", json!("30s")),
                ("timeout", json!("5s")),
                ("retries", json!(2)),
            ]),
        )
        .with("log_driver", "json-file")
        .with(
            "log_opts",
            Property::map([("max-size", "1G"), ("max-file", "4")]),
        )
        .with("restart", "unless-stopped")
        .depends_on("invidious-db");

    let metadata = StackMetadata::new(STACK_NAME, stage);
    log::debug!(
        "Built {STACK_NAME} stack for stage {stage} (default policy {})",
        metadata.default_policy
    );

    Stack::new(metadata)
        .with(db_user)
        .with(db_pass)
        .with(hmac_key)
        .with(tailnet_key)
        .with(tailscale)
        .with(postgres_data)
        .with(network)
        .with(db)
        .with(app)
}

/// Names of the resources a teardown leaves in place
pub fn retained(stack: &Stack) -> Vec<&str> {
    stack
        .resources
        .iter()
        .filter(|d| d.lifecycle.unwrap_or(stack.metadata.default_policy) == LifecyclePolicy::Retain)
        .map(|d| d.name.as_str())
        .collect()
}
