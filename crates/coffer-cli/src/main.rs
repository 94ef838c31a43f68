//! coffer: command-line client for coffer databases
//!
//! Commands:
//!   create             - create a new database (password and/or key file)
//!   add-group          - add a group at a path
//!   add                - add an entry
//!   edit               - edit an entry (captures a history snapshot)
//!   list               - list a group's contents
//!   show               - show one entry
//!   locate             - search entry paths
//!   attachment-export  - write an attachment's bytes to a file or stdout
//!   import             - build a new database from an XML export
//!   prune-history      - apply the configured history retention policy
//!   config show        - display the active configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::io::Write;
use std::path::{Path, PathBuf};

use coffer_core::config::CofferConfig;
use coffer_crypto::{CompositeKey, KdfEngine, KdfParams, KeyfileKey, PasswordKey};
use coffer_db::Database;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffer",
    version,
    about = "coffer password database client",
    long_about = "coffer: manage encrypted credential databases from the command line"
)]
struct Cli {
    /// Path to coffer.toml configuration file
    #[arg(long, short = 'c', env = "COFFER_CONFIG", default_value = "coffer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new database
    Create {
        /// Path of the new database file
        database: PathBuf,
        /// Prompt for a master password (asked twice)
        #[arg(long, short = 'p')]
        set_password: bool,
        /// Key file to use; created with fresh random material if absent
        #[arg(long, short = 'k')]
        set_key_file: Option<PathBuf>,
        /// Benchmark the KDF so one unlock takes about this many milliseconds
        #[arg(long, short = 't')]
        decryption_time: Option<u64>,
    },

    /// Add a group at the given path
    #[command(name = "add-group")]
    AddGroup {
        database: PathBuf,
        /// Path of the group to add, e.g. Email/Work
        group: String,
        /// Key file unlocking the database
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Add an entry at the given path
    Add {
        database: PathBuf,
        /// Path of the entry to add, e.g. Email/Gmail
        entry: String,
        #[arg(long, short = 'u')]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Prompt for the entry password
        #[arg(long, short = 'p')]
        password_prompt: bool,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Edit an entry's fields; a history snapshot is kept if anything changed
    Edit {
        database: PathBuf,
        /// Path of the entry to edit
        entry: String,
        #[arg(long, short = 't')]
        title: Option<String>,
        #[arg(long, short = 'u')]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Prompt for a new entry password
        #[arg(long, short = 'p')]
        password_prompt: bool,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// List the contents of a group (default: the root)
    List {
        database: PathBuf,
        /// Path of the group to list
        group: Option<String>,
        /// Recurse into subgroups
        #[arg(long, short = 'R')]
        recursive: bool,
        /// One path per line instead of an indented tree
        #[arg(long, short = 'f')]
        flatten: bool,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Show an entry's fields (protected attribute values stay hidden)
    Show {
        database: PathBuf,
        entry: String,
        /// Also print the password
        #[arg(long, short = 's')]
        show_password: bool,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Search entry paths for a term
    Locate {
        database: PathBuf,
        term: String,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Export an attachment of an entry
    #[command(name = "attachment-export")]
    AttachmentExport {
        database: PathBuf,
        /// Path of the entry with the target attachment
        entry: String,
        /// Name of the attachment to export
        name: String,
        /// Write here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Create a database from a trusted XML export
    Import {
        /// XML file to import
        xml: PathBuf,
        /// Path of the new database file
        database: PathBuf,
        #[arg(long, short = 'k')]
        set_key_file: Option<PathBuf>,
    },

    /// Apply the configured history retention policy and save
    #[command(name = "prune-history")]
    PruneHistory {
        database: PathBuf,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    match cli.command {
        Commands::Create {
            database,
            set_password,
            set_key_file,
            decryption_time,
        } => cmd_create(
            &config,
            &database,
            set_password,
            set_key_file.as_deref(),
            decryption_time,
        ),
        Commands::AddGroup {
            database,
            group,
            key_file,
        } => cmd_add_group(&database, &group, key_file.as_deref()),
        Commands::Add {
            database,
            entry,
            username,
            url,
            password_prompt,
            key_file,
        } => cmd_add(
            &database,
            &entry,
            username.as_deref(),
            url.as_deref(),
            password_prompt,
            key_file.as_deref(),
        ),
        Commands::Edit {
            database,
            entry,
            title,
            username,
            url,
            password_prompt,
            key_file,
        } => cmd_edit(
            &database,
            &entry,
            title.as_deref(),
            username.as_deref(),
            url.as_deref(),
            password_prompt,
            key_file.as_deref(),
        ),
        Commands::List {
            database,
            group,
            recursive,
            flatten,
            key_file,
        } => cmd_list(
            &database,
            group.as_deref(),
            recursive,
            flatten,
            key_file.as_deref(),
        ),
        Commands::Show {
            database,
            entry,
            show_password,
            key_file,
        } => cmd_show(&database, &entry, show_password, key_file.as_deref()),
        Commands::Locate {
            database,
            term,
            key_file,
        } => cmd_locate(&database, &term, key_file.as_deref()),
        Commands::AttachmentExport {
            database,
            entry,
            name,
            output,
            key_file,
        } => cmd_attachment_export(
            &database,
            &entry,
            &name,
            output.as_deref(),
            key_file.as_deref(),
        ),
        Commands::Import {
            xml,
            database,
            set_key_file,
        } => cmd_import(&xml, &database, set_key_file.as_deref()),
        Commands::PruneHistory { database, key_file } => {
            cmd_prune_history(&config, &database, key_file.as_deref())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config loading and logging ───────────────────────────────────────────────

fn load_config(path: &Path) -> Result<CofferConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CofferConfig::default())
    }
}

fn init_logging(config: &CofferConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Key assembly ──────────────────────────────────────────────────────────────

/// Build a composite key from an interactive password prompt plus an
/// optional key file. An empty password contributes no factor, so a run
/// with neither password nor key file fails with the no-key error.
fn prompt_composite_key(prompt: &str, key_file: Option<&Path>) -> Result<CompositeKey> {
    let mut key = CompositeKey::new();

    let password = rpassword::prompt_password(prompt).context("reading password")?;
    if !password.is_empty() {
        key.add_key(Box::new(PasswordKey::new(SecretString::from(password))));
    }

    if let Some(path) = key_file {
        let factor = KeyfileKey::load(path)
            .with_context(|| format!("loading key file {}", path.display()))?;
        key.add_key(Box::new(factor));
    }

    Ok(key)
}

fn unlock(database: &Path, key_file: Option<&Path>) -> Result<Database> {
    let prompt = format!("Enter password to unlock {}: ", database.display());
    let key = prompt_composite_key(&prompt, key_file)?;
    tracing::debug!(path = %database.display(), "unlocking");
    Ok(Database::unlock(database, key)?)
}

/// Create-then-load for a key file named on the command line: absent
/// files get fresh random material first, and both steps must succeed.
fn load_or_create_key_file(path: &Path) -> Result<KeyfileKey> {
    if !path.exists() {
        KeyfileKey::create(path)
            .with_context(|| format!("creating key file {}", path.display()))?;
        println!("Created key file {}.", path.display());
    }
    KeyfileKey::load(path).with_context(|| format!("loading key file {}", path.display()))
}

fn confirmed_password() -> Result<SecretString> {
    let first = rpassword::prompt_password("Enter password for the database: ")?;
    let second = rpassword::prompt_password("Repeat password: ")?;
    if first != second {
        bail!("passwords do not match");
    }
    if first.is_empty() {
        bail!("password must not be empty");
    }
    Ok(SecretString::from(first))
}

// ── `coffer create` ───────────────────────────────────────────────────────────

fn cmd_create(
    config: &CofferConfig,
    database: &Path,
    set_password: bool,
    set_key_file: Option<&Path>,
    decryption_time: Option<u64>,
) -> Result<()> {
    if database.exists() {
        bail!("file {} already exists", database.display());
    }

    let mut key = CompositeKey::new();
    if set_password {
        key.add_key(Box::new(PasswordKey::new(confirmed_password()?)));
    }
    if let Some(path) = set_key_file {
        key.add_key(Box::new(load_or_create_key_file(path)?));
    }
    if key.is_empty() {
        bail!("no key is set, aborting database creation");
    }

    let mut db = Database::new();
    let kdf = KdfEngine::new(KdfParams::new(
        config.kdf.mem_cost_kib,
        config.kdf.time_cost,
        config.kdf.parallelism,
    ))?;

    if let Some(target_ms) = decryption_time {
        if target_ms == 0 {
            bail!("invalid decryption time 0");
        }
        println!("Benchmarking key derivation function for {target_ms}ms delay.");
        let mut kdf = kdf;
        let rounds = kdf.benchmark(target_ms);
        println!("Setting {rounds} rounds for key derivation function.");
        kdf.set_rounds(rounds)?;
        db.change_kdf(kdf);
    } else {
        db.change_kdf(kdf);
    }

    db.set_key(key)?;
    db.save_as(database, false, true, false)?;

    println!("Successfully created new database.");
    Ok(())
}

// ── Mutating commands ─────────────────────────────────────────────────────────

fn cmd_add_group(database: &Path, group: &str, key_file: Option<&Path>) -> Result<()> {
    let mut db = unlock(database, key_file)?;
    db.create_group(group)?;
    db.save(database, true, false)?;
    println!("Successfully added group {group}.");
    Ok(())
}

fn cmd_add(
    database: &Path,
    entry_path: &str,
    username: Option<&str>,
    url: Option<&str>,
    password_prompt: bool,
    key_file: Option<&Path>,
) -> Result<()> {
    let mut db = unlock(database, key_file)?;

    let (group_path, title) = match entry_path.trim_matches('/').rsplit_once('/') {
        Some((group, title)) => (group, title),
        None => ("", entry_path.trim_matches('/')),
    };
    if title.is_empty() {
        bail!("entry path must name an entry");
    }

    let mut entry = coffer_db::Entry::new(title);
    if let Some(username) = username {
        entry.set_username(username);
    }
    if let Some(url) = url {
        entry.set_url(url);
    }
    if password_prompt {
        let password = rpassword::prompt_password("Enter password for new entry: ")?;
        entry.set_password(password);
    }

    db.create_entry(group_path, entry)?;
    db.save(database, true, false)?;
    println!("Successfully added entry {title}.");
    Ok(())
}

fn cmd_edit(
    database: &Path,
    entry_path: &str,
    title: Option<&str>,
    username: Option<&str>,
    url: Option<&str>,
    password_prompt: bool,
    key_file: Option<&Path>,
) -> Result<()> {
    if title.is_none() && username.is_none() && url.is_none() && !password_prompt {
        bail!("not changing any field for entry {entry_path}");
    }

    let mut db = unlock(database, key_file)?;
    // Read the new password before opening the update bracket.
    let new_password = if password_prompt {
        Some(rpassword::prompt_password("Enter new password for entry: ")?)
    } else {
        None
    };

    let entry = db.entry_mut(entry_path)?;
    entry.begin_update();
    if let Some(title) = title {
        entry.set_title(title);
    }
    if let Some(username) = username {
        entry.set_username(username);
    }
    if let Some(url) = url {
        entry.set_url(url);
    }
    if let Some(password) = new_password {
        entry.set_password(password);
    }
    entry.end_update();
    let title = entry.title().to_string();

    db.save(database, true, false)?;
    println!("Successfully edited entry {title}.");
    Ok(())
}

// ── Read-only commands ────────────────────────────────────────────────────────

fn cmd_list(
    database: &Path,
    group: Option<&str>,
    recursive: bool,
    flatten: bool,
    key_file: Option<&Path>,
) -> Result<()> {
    let db = unlock(database, key_file)?;
    let group = db.group(group.unwrap_or("/"))?;
    print!("{}", group.print(recursive, flatten));
    Ok(())
}

fn cmd_show(
    database: &Path,
    entry_path: &str,
    show_password: bool,
    key_file: Option<&Path>,
) -> Result<()> {
    let db = unlock(database, key_file)?;
    let entry = db.entry(entry_path)?;

    println!("Title: {}", entry.title());
    println!("Username: {}", entry.username());
    if show_password {
        println!("Password: {}", entry.password());
    } else {
        println!("Password: PROTECTED");
    }
    println!("URL: {}", entry.url());
    println!("Notes: {}", entry.notes());
    for attr in entry.attributes() {
        if attr.protected {
            println!("{}: PROTECTED", attr.key);
        } else {
            println!("{}: {}", attr.key, attr.value);
        }
    }
    let attachments: Vec<&str> = entry.attachment_names().collect();
    if !attachments.is_empty() {
        println!("Attachments: {}", attachments.join(", "));
    }
    Ok(())
}

fn cmd_locate(database: &Path, term: &str, key_file: Option<&Path>) -> Result<()> {
    let db = unlock(database, key_file)?;
    let hits = db.locate(term);
    if hits.is_empty() {
        bail!("no results for {term}");
    }
    for path in hits {
        println!("{path}");
    }
    Ok(())
}

fn cmd_attachment_export(
    database: &Path,
    entry_path: &str,
    name: &str,
    output: Option<&Path>,
    key_file: Option<&Path>,
) -> Result<()> {
    let db = unlock(database, key_file)?;
    let entry = db.entry(entry_path)?;
    let bytes = entry.attachment(name)?;

    match output {
        Some(path) => {
            std::fs::write(path, bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Exported attachment {name} to {}.", path.display());
        }
        None => {
            std::io::stdout()
                .write_all(bytes)
                .context("writing attachment to stdout")?;
        }
    }
    Ok(())
}

// ── Import and maintenance ────────────────────────────────────────────────────

fn cmd_import(xml: &Path, database: &Path, set_key_file: Option<&Path>) -> Result<()> {
    if database.exists() {
        bail!("file {} already exists", database.display());
    }

    let content = std::fs::read_to_string(xml)
        .with_context(|| format!("reading XML export {}", xml.display()))?;
    // The import must fully succeed before any database is persisted.
    let root = coffer_db::xml::import_xml(&content)?;

    let mut key = CompositeKey::new();
    key.add_key(Box::new(PasswordKey::new(confirmed_password()?)));
    if let Some(path) = set_key_file {
        key.add_key(Box::new(load_or_create_key_file(path)?));
    }

    let mut db = Database::new();
    *db.root_mut() = root;
    db.set_key(key)?;
    db.save_as(database, false, true, false)?;

    println!("Successfully imported database.");
    Ok(())
}

fn cmd_prune_history(
    config: &CofferConfig,
    database: &Path,
    key_file: Option<&Path>,
) -> Result<()> {
    let mut db = unlock(database, key_file)?;
    let removed = db.prune_history(&config.history);
    if removed == 0 {
        println!("Nothing to prune.");
        return Ok(());
    }
    db.save(database, true, true)?;
    println!("Pruned {removed} history snapshots.");
    Ok(())
}

fn cmd_config_show(config: &CofferConfig, path: &Path) -> Result<()> {
    if path.exists() {
        println!("# {}", path.display());
    } else {
        println!("# defaults ({} not found)", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
