//! Wealth Ocean panel CLI.
//!
//! Usage:
//!   wealth-ocean login -u ravi -p secret
//!   wealth-ocean clients list
//!   wealth-ocean clients add --broker dhan --userid U1 --access-token TOKEN
//!   wealth-ocean groups add --name Scalpers --multiplier 2 --member U1 --member U2
//!   wealth-ocean clients edit U1 --capital 250000
//!   wealth-ocean setups enable nifty_mirror
//!   wealth-ocean positions

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wealth_ocean::config::Config;
use wealth_ocean::model::{
    AccountSummary, Broker, Client, CopySetup, Group, Holding, Order, Position, RecordKey, Resource,
};
use wealth_ocean::poller::{ActivationPoller, PollSettings};
use wealth_ocean::remote::{PanelApi, RemoteStore, ReportStore};
use wealth_ocean::session::{AuthClient, SessionContext, SessionStore};
use wealth_ocean::storage::{FileStorage, LocalStorage};
use wealth_ocean::sync::{DataSource, Loaded, MutationOutcome, ResourceSync, SessionOutcome};
use wealth_ocean::PanelError;

#[derive(Parser)]
#[command(name = "wealth-ocean")]
#[command(about = "Wealth Ocean multi-broker trading panel client", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (TOML). Falls back to defaults + env when missing.
    #[arg(short, long, default_value = "wealth-ocean.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        user_id: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create a panel user
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Check the backend is reachable
    Health,
    /// Broker client accounts
    Clients {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Client groups
    Groups {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Copy-trading setups
    Setups {
        #[command(subcommand)]
        action: SetupAction,
    },
    /// Order books of all logged-in clients
    Orders,
    /// Open and closed positions
    Positions,
    /// Demat holdings
    Holdings,
    /// Per-account capital and P&L
    Summary,
}

#[derive(Subcommand)]
enum ClientAction {
    List,
    /// Add a client and wait for its broker login
    Add {
        #[arg(short, long, default_value = "dhan")]
        broker: String,
        #[arg(short, long)]
        userid: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        capital: Option<Decimal>,
        #[arg(long)]
        access_token: Option<String>,
        #[arg(long)]
        apikey: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        pan: Option<String>,
        #[arg(long)]
        totpkey: Option<String>,
        /// Return right after the add request instead of polling the session
        #[arg(long)]
        no_wait: bool,
    },
    /// Edit a client by key (`broker::userid`) or user id; omitted fields keep their value
    Edit {
        id: String,
        #[arg(short, long, default_value = "dhan")]
        broker: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        capital: Option<Decimal>,
        #[arg(long)]
        access_token: Option<String>,
        #[arg(long)]
        apikey: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        pan: Option<String>,
        #[arg(long)]
        totpkey: Option<String>,
    },
    /// Delete clients by key (`broker::userid`) or user id
    Delete {
        #[arg(short, long, default_value = "dhan")]
        broker: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    List,
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "1")]
        multiplier: Decimal,
        #[arg(long = "member", required = true)]
        members: Vec<String>,
    },
    /// Edit a group by id or name; omitted fields keep their value
    Edit {
        key: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        multiplier: Option<Decimal>,
        #[arg(long = "member")]
        members: Vec<String>,
    },
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SetupAction {
    List,
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        master: String,
        #[arg(long = "child", required = true)]
        children: Vec<String>,
        /// Per-child multiplier as CHILD=VALUE
        #[arg(long = "multiplier")]
        multipliers: Vec<String>,
        #[arg(long)]
        enabled: bool,
    },
    /// Edit a setup by id or name; omitted fields keep their value
    Edit {
        key: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        master: Option<String>,
        #[arg(long = "child")]
        children: Vec<String>,
        /// Per-child multiplier as CHILD=VALUE
        #[arg(long = "multiplier")]
        multipliers: Vec<String>,
    },
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Enable {
        key: String,
    },
    Disable {
        key: String,
    },
}

/// Everything a command needs, built once at startup.
struct Panel {
    config: Config,
    storage: Arc<dyn LocalStorage>,
    sessions: SessionStore,
    session: SessionContext,
}

impl Panel {
    fn open(config: Config) -> Result<Self> {
        let storage: Arc<dyn LocalStorage> = Arc::new(
            FileStorage::open(&config.storage.dir, &config.storage.prefix)
                .with_context(|| format!("opening data dir {}", config.storage.dir.display()))?,
        );
        let sessions = SessionStore::new(Arc::clone(&storage));
        let session = sessions.load();
        Ok(Self {
            config,
            storage,
            sessions,
            session,
        })
    }

    /// Authenticated backend client. Fails with `AuthRequired` when logged out.
    fn api(&self) -> Result<Arc<PanelApi>> {
        self.session.require_token()?;
        Ok(Arc::new(PanelApi::new(&self.config.api, &self.session)?))
    }

    fn clients(&self) -> Result<ResourceSync<Client, RemoteStore<Client>>> {
        let endpoints = self.config.endpoints.clients.clone();
        let fallback = endpoints.empty_list_uses_fallback;
        let store = Arc::new(RemoteStore::new(self.api()?, endpoints));
        Ok(ResourceSync::new(store, Arc::clone(&self.storage)).empty_list_uses_fallback(fallback))
    }

    fn groups(&self) -> Result<ResourceSync<Group, RemoteStore<Group>>> {
        let endpoints = self.config.endpoints.groups.clone();
        let fallback = endpoints.empty_list_uses_fallback;
        let store = Arc::new(RemoteStore::new(self.api()?, endpoints));
        Ok(ResourceSync::new(store, Arc::clone(&self.storage)).empty_list_uses_fallback(fallback))
    }

    fn report<R: Resource>(&self, path: &str) -> Result<ResourceSync<R, ReportStore<R>>> {
        let store = Arc::new(ReportStore::new(self.api()?, path));
        Ok(ResourceSync::new(store, Arc::clone(&self.storage)))
    }

    fn setups(&self) -> Result<ResourceSync<CopySetup, RemoteStore<CopySetup>>> {
        let endpoints = self.config.endpoints.copy_setups.clone();
        let fallback = endpoints.empty_list_uses_fallback;
        let store = Arc::new(RemoteStore::new(self.api()?, endpoints));
        Ok(ResourceSync::new(store, Arc::clone(&self.storage)).empty_list_uses_fallback(fallback))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!(config = %display_path(&cli.config), "wealth-ocean v{} starting", env!("CARGO_PKG_VERSION"));

    let panel = Panel::open(config)?;
    match run(&panel, cli.command).await {
        Err(e) if matches!(e.downcast_ref::<PanelError>(), Some(PanelError::AuthRequired)) => {
            eprintln!("Not logged in. Run `wealth-ocean login -u <user> -p <password>` first.");
            std::process::exit(2);
        }
        other => other,
    }
}

fn display_path(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        "<env>".to_string()
    }
}

async fn run(panel: &Panel, command: Commands) -> Result<()> {
    match command {
        Commands::Login { user_id, password } => {
            let auth = AuthClient::new(&panel.config.api)?;
            let session = auth.login(&user_id, &password).await?;
            panel.sessions.save(&session)?;
            println!("Logged in as {}", session.user.as_deref().unwrap_or(&user_id));
            if !session.is_authenticated() {
                println!("warning: backend issued no token; panel commands will ask you to log in again");
            }
        }
        Commands::Register {
            name,
            email,
            password,
        } => {
            let auth = AuthClient::new(&panel.config.api)?;
            let msg = auth.register(&name, &email, &password).await?;
            println!("{}. You can now log in with {}.", msg, email.trim().to_lowercase());
        }
        Commands::Logout => {
            panel.sessions.clear()?;
            println!("Logged out.");
        }
        Commands::Health => {
            let api = PanelApi::new(&panel.config.api, &panel.session)?;
            if api.health(&panel.config.api.health_path).await {
                println!("Backend OK ({})", panel.config.api.base_url);
            } else {
                bail!("backend unreachable at {}", panel.config.api.base_url);
            }
        }
        Commands::Clients { action } => run_clients(panel, action).await?,
        Commands::Groups { action } => run_groups(panel, action).await?,
        Commands::Setups { action } => run_setups(panel, action).await?,
        Commands::Orders => {
            let loaded = panel
                .report::<Order>(&panel.config.endpoints.reports.orders)?
                .load()
                .await;
            report_source(&loaded);
            print_orders(&loaded.records);
        }
        Commands::Positions => {
            let loaded = panel
                .report::<Position>(&panel.config.endpoints.reports.positions)?
                .load()
                .await;
            report_source(&loaded);
            print_positions(&loaded.records);
        }
        Commands::Holdings => {
            let loaded = panel
                .report::<Holding>(&panel.config.endpoints.reports.holdings)?
                .load()
                .await;
            report_source(&loaded);
            print_holdings(&loaded.records);
        }
        Commands::Summary => {
            let loaded = panel
                .report::<AccountSummary>(&panel.config.endpoints.reports.summary)?
                .load()
                .await;
            report_source(&loaded);
            print_summary(&loaded.records);
        }
    }
    Ok(())
}

async fn run_clients(panel: &Panel, action: ClientAction) -> Result<()> {
    let clients = panel.clients()?;
    match action {
        ClientAction::List => {
            let loaded = clients.load().await;
            report_source(&loaded);
            print_clients(&loaded.records);
        }
        ClientAction::Add {
            broker,
            userid,
            name,
            capital,
            access_token,
            apikey,
            password,
            pan,
            totpkey,
            no_wait,
        } => {
            let mut client = Client::new(Broker::from(broker), userid.trim());
            client.display_name = name;
            client.capital = capital;
            let client = with_credentials(client, [access_token, apikey, password, pan, totpkey]);
            let key = client.key();

            if no_wait {
                let outcome = clients.create(client).await?;
                report_mutation("Client saved", &outcome);
                return Ok(());
            }

            let poller = ActivationPoller::new(
                Arc::clone(clients.api()),
                PollSettings::from(&panel.config.poll),
            );
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            println!(
                "Client {} saved, waiting for broker login (up to {} checks every {}ms)...",
                key, panel.config.poll.max_attempts, panel.config.poll.interval_ms
            );
            match clients.add_and_await_session(client, &poller, &cancel).await? {
                SessionOutcome::Active(c) => println!("Session ACTIVE for {}", c.key()),
                SessionOutcome::Pending(warning) => println!("warning: {}", warning),
                SessionOutcome::Cancelled => println!("Stopped waiting; the login continues on the backend."),
                SessionOutcome::Offline(e) => {
                    warn!(error = %e, "client stored locally only");
                    println!("warning: backend unreachable ({}); client stored locally only", e);
                }
            }
        }
        ClientAction::Edit {
            id,
            broker,
            name,
            capital,
            access_token,
            apikey,
            password,
            pan,
            totpkey,
        } => {
            let key = client_key(&Broker::from(broker), &id);
            let mut edited = clients
                .load()
                .await
                .records
                .into_iter()
                .find(|c| c.key() == key)
                .with_context(|| format!("no client {}", key))?;
            if let Some(name) = name {
                edited.display_name = Some(name.trim().to_string()).filter(|n| !n.is_empty());
            }
            if capital.is_some() {
                edited.capital = capital;
            }
            let edited = with_credentials(edited, [access_token, apikey, password, pan, totpkey]);
            let outcome = clients.update(&key, edited).await?;
            report_mutation("Client updated", &outcome);
        }
        ClientAction::Delete { broker, ids } => {
            let broker = Broker::from(broker);
            let keys: Vec<RecordKey> = ids.iter().map(|id| client_key(&broker, id)).collect();
            let outcome = clients.delete(&keys).await?;
            report_mutation(&format!("Deleted {} client(s)", keys.len()), &outcome);
        }
    }
    Ok(())
}

async fn run_groups(panel: &Panel, action: GroupAction) -> Result<()> {
    let groups = panel.groups()?;
    match action {
        GroupAction::List => {
            let loaded = groups.load().await;
            report_source(&loaded);
            print_groups(&loaded.records);
        }
        GroupAction::Add {
            name,
            multiplier,
            members,
        } => {
            let outcome = groups
                .create(Group::new(name.trim(), multiplier, members))
                .await?;
            report_mutation("Group saved", &outcome);
        }
        GroupAction::Edit {
            key,
            name,
            multiplier,
            members,
        } => {
            let key = RecordKey::new(key);
            let current = groups
                .load()
                .await
                .records
                .into_iter()
                .find(|g| g.key() == key)
                .with_context(|| format!("no group {}", key))?;
            let mut edited = current.clone();
            if let Some(name) = name {
                edited.name = name.trim().to_string();
            }
            if let Some(m) = multiplier {
                edited.multiplier = m;
            }
            if !members.is_empty() {
                edited.members = members;
            }
            let outcome = groups.update(&key, edited).await?;
            report_mutation("Group updated", &outcome);
        }
        GroupAction::Delete { keys } => {
            let keys: Vec<RecordKey> = keys.into_iter().map(RecordKey::new).collect();
            let outcome = groups.delete(&keys).await?;
            report_mutation(&format!("Deleted {} group(s)", keys.len()), &outcome);
        }
    }
    Ok(())
}

async fn run_setups(panel: &Panel, action: SetupAction) -> Result<()> {
    let setups = panel.setups()?;
    match action {
        SetupAction::List => {
            let loaded = setups.load().await;
            report_source(&loaded);
            print_setups(&loaded.records);
        }
        SetupAction::Add {
            name,
            master,
            children,
            multipliers,
            enabled,
        } => {
            let mut setup = CopySetup::new(name.trim(), master.trim(), children);
            setup.enabled = enabled;
            apply_multipliers(&mut setup, &multipliers)?;
            let outcome = setups.create(setup).await?;
            report_mutation("Copy setup saved", &outcome);
        }
        SetupAction::Edit {
            key,
            name,
            master,
            children,
            multipliers,
        } => {
            let key = RecordKey::new(key);
            let mut edited = setups
                .load()
                .await
                .records
                .into_iter()
                .find(|s| s.key() == key)
                .with_context(|| format!("no copy setup {}", key))?;
            if let Some(name) = name {
                edited.name = name.trim().to_string();
            }
            if let Some(master) = master {
                edited.master = master.trim().to_string();
            }
            if !children.is_empty() {
                edited.children = children;
                edited.multipliers.retain(|child, _| edited.children.contains(child));
            }
            apply_multipliers(&mut edited, &multipliers)?;
            let outcome = setups.update(&key, edited).await?;
            report_mutation("Copy setup updated", &outcome);
        }
        SetupAction::Delete { keys } => {
            let keys: Vec<RecordKey> = keys.into_iter().map(RecordKey::new).collect();
            let outcome = setups.delete(&keys).await?;
            report_mutation(&format!("Deleted {} setup(s)", keys.len()), &outcome);
        }
        SetupAction::Enable { key } => {
            let outcome = setups.set_enabled(&RecordKey::new(key), true).await;
            report_mutation("Setup enabled", &outcome);
        }
        SetupAction::Disable { key } => {
            let outcome = setups.set_enabled(&RecordKey::new(key), false).await;
            report_mutation("Setup disabled", &outcome);
        }
    }
    Ok(())
}

/// Accept either a full `broker::userid` key or a bare user id.
fn client_key(broker: &Broker, id: &str) -> RecordKey {
    if id.contains("::") {
        RecordKey::new(id)
    } else {
        Client::key_for(broker, id.trim())
    }
}

/// Credentials in form order: access_token, apikey, password, pan, totpkey.
fn with_credentials(mut client: Client, values: [Option<String>; 5]) -> Client {
    const FIELDS: [&str; 5] = ["access_token", "apikey", "password", "pan", "totpkey"];
    for (field, value) in FIELDS.into_iter().zip(values) {
        if let Some(v) = value {
            client = client.with_credential(field, v);
        }
    }
    client
}

/// Parse `CHILD=VALUE` pairs into the setup's multiplier map.
fn apply_multipliers(setup: &mut CopySetup, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let (child, value) = pair
            .split_once('=')
            .with_context(|| format!("multiplier {:?} is not CHILD=VALUE", pair))?;
        let value = Decimal::from_str(value.trim())
            .with_context(|| format!("bad multiplier for {}", child))?;
        setup.multipliers.insert(child.trim().to_string(), value);
    }
    Ok(())
}

// ─── Output ─────────────────────────────────────────────────────────────────

fn report_source<R>(loaded: &Loaded<R>) {
    if loaded.source == DataSource::Fallback {
        match &loaded.warning {
            Some(w) => println!("warning: {} (showing cached data)", w),
            None => println!("(showing cached data)"),
        }
    }
}

fn report_mutation<R: Resource>(done: &str, outcome: &MutationOutcome<R>) {
    match outcome {
        MutationOutcome::Remote(loaded) => {
            println!("{}.", done);
            report_source(loaded);
        }
        MutationOutcome::Offline { error, records } => {
            println!(
                "warning: backend unavailable ({}); change applied to local copy ({} {} cached)",
                error,
                records.len(),
                R::KIND
            );
        }
    }
}

fn print_clients(clients: &[Client]) {
    if clients.is_empty() {
        println!("No clients.");
        return;
    }
    println!("{:<10} {:<14} {:<20} {:>12}  {}", "BROKER", "USER ID", "NAME", "CAPITAL", "SESSION");
    for c in clients {
        println!(
            "{:<10} {:<14} {:<20} {:>12}  {}",
            c.broker,
            c.userid,
            c.display_name.as_deref().unwrap_or("-"),
            c.capital.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            c.session_status,
        );
    }
}

fn print_groups(groups: &[Group]) {
    if groups.is_empty() {
        println!("No groups.");
        return;
    }
    println!("{:<8} {:<20} {:>6}  {}", "ID", "NAME", "MULT", "MEMBERS");
    for g in groups {
        println!(
            "{:<8} {:<20} {:>6}  {}",
            g.id.as_deref().unwrap_or("-"),
            g.name,
            g.multiplier,
            g.members.join(", "),
        );
    }
}

fn print_setups(setups: &[CopySetup]) {
    if setups.is_empty() {
        println!("No copy setups.");
        return;
    }
    println!("{:<28} {:<20} {:<10} {:<8}  {}", "ID", "NAME", "MASTER", "ENABLED", "CHILDREN");
    for s in setups {
        let children: Vec<String> = s
            .children
            .iter()
            .map(|c| format!("{} x{}", c, s.multiplier_for(c)))
            .collect();
        println!(
            "{:<28} {:<20} {:<10} {:<8}  {}",
            s.setup_id.as_deref().unwrap_or("-"),
            s.name,
            s.master,
            if s.enabled { "yes" } else { "no" },
            children.join(", "),
        );
    }
}

fn print_orders(orders: &[Order]) {
    if orders.is_empty() {
        println!("No orders.");
        return;
    }
    println!(
        "{:<16} {:<20} {:<5} {:>8} {:>10}  {:<12} {}",
        "CLIENT", "SYMBOL", "SIDE", "QTY", "PRICE", "STATUS", "ORDER ID"
    );
    for o in orders {
        println!(
            "{:<16} {:<20} {:<5} {:>8} {:>10}  {:<12} {}",
            o.name,
            o.symbol,
            o.transaction_type,
            o.quantity,
            o.price,
            o.status,
            o.order_id.as_deref().unwrap_or("-"),
        );
    }
}

fn print_positions(positions: &[Position]) {
    if positions.is_empty() {
        println!("No positions.");
        return;
    }
    println!(
        "{:<16} {:<20} {:>8} {:>10} {:>10} {:>12}  {}",
        "CLIENT", "SYMBOL", "QTY", "BUY AVG", "SELL AVG", "NET P&L", "STATE"
    );
    for p in positions {
        println!(
            "{:<16} {:<20} {:>8} {:>10} {:>10} {:>12}  {}",
            p.name,
            p.symbol,
            p.quantity,
            p.buy_avg,
            p.sell_avg,
            p.net_profit,
            if p.is_open() { "open" } else { "closed" },
        );
    }
}

fn print_holdings(holdings: &[Holding]) {
    if holdings.is_empty() {
        println!("No holdings.");
        return;
    }
    println!(
        "{:<16} {:<20} {:>8} {:>10} {:>10} {:>12}",
        "CLIENT", "SYMBOL", "QTY", "BUY AVG", "LTP", "P&L"
    );
    for h in holdings {
        println!(
            "{:<16} {:<20} {:>8} {:>10} {:>10} {:>12}",
            h.name, h.symbol, h.quantity, h.buy_avg, h.ltp, h.pnl,
        );
    }
}

fn print_summary(rows: &[AccountSummary]) {
    if rows.is_empty() {
        println!("No account summary.");
        return;
    }
    println!(
        "{:<16} {:>12} {:>12} {:>10} {:>12} {:>12} {:>10}",
        "CLIENT", "CAPITAL", "INVESTED", "P&L", "VALUE", "MARGIN", "NET GAIN"
    );
    for r in rows {
        println!(
            "{:<16} {:>12} {:>12} {:>10} {:>12} {:>12} {:>10}",
            r.name, r.capital, r.invested, r.pnl, r.current_value, r.available_margin, r.net_gain,
        );
    }
}
