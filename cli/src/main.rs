//! `todo`: terminal front end for the todo service.
//!
//! Sign in with `todo login` (prints the provider URL) followed by
//! `todo callback <redirect url>`, then manage items with the remaining
//! subcommands. The session is kept on disk between runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use uuid::Uuid;

use todo_core::{
    handle_oauth_callback, parse_callback_code, verify_state, AuthStore, AuthorizationRequest,
    ClientConfig, CreateTodo, FileStorage, HttpClient, LoginRedirect, ReqwestTransport,
    SupabaseAuth, Todo, TodoApi, TodoFilter, TodoStore, Transport, UpdateTodo,
};

const VERIFIER_FILE: &str = "pkce-verifier";
const STATE_FILE: &str = "oauth-state";

#[derive(Parser, Debug)]
#[command(name = "todo")]
#[command(version)]
#[command(about = "Manage your todos from the terminal", long_about = None)]
struct Args {
    /// YAML config file (defaults to $TODO_CONFIG, then ./todo.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the sign-in URL
    Login,

    /// Finish sign-in with the URL the browser was redirected to
    Callback {
        /// Full redirect URL, including the `#access_token=...` fragment or `?code=...`
        url: String,
    },

    /// List todos
    List {
        /// all, active or completed
        #[arg(short, long, default_value = "all")]
        filter: TodoFilter,
    },

    /// Add a todo
    Add {
        title: String,
        /// Create it already completed
        #[arg(long)]
        done: bool,
    },

    /// Change a todo's title and/or completion
    Update {
        id: Uuid,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(long)]
        completed: Option<bool>,
    },

    /// Flip a todo between active and completed
    Toggle { id: Uuid },

    /// Delete a todo
    Delete { id: Uuid },

    /// Show the signed-in user
    Whoami,

    /// Forget the local session
    Logout,
}

/// Tells the user to sign in again once the session cannot be refreshed.
struct CliRedirect;

impl LoginRedirect for CliRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        eprintln!("Your session has expired. Run `todo login` to sign in again ({login_path}).");
    }
}

struct App {
    config: ClientConfig,
    storage_dir: PathBuf,
    provider: Arc<SupabaseAuth>,
    auth: AuthStore,
    todos: TodoStore,
}

impl App {
    fn build(config: ClientConfig) -> Result<Self> {
        let storage_dir = match &config.storage_dir {
            Some(dir) => dir.clone(),
            None => FileStorage::default_dir().context("Failed to locate session storage")?,
        };
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(config.timeout()).context("Failed to build HTTP client")?,
        );
        // The mock server answers the identity endpoints on the API origin.
        let provider_url = config.supabase_url.as_deref().unwrap_or(&config.api_url);
        let provider = Arc::new(SupabaseAuth::new(
            provider_url,
            config.supabase_anon_key.clone().unwrap_or_default(),
            transport.clone(),
        ));
        let auth = AuthStore::new(provider.clone(), Arc::new(FileStorage::new(&storage_dir)));
        let http = HttpClient::new(transport, auth.clone())
            .with_redirect(Arc::new(CliRedirect))
            .with_login_path(config.login_path.clone());
        let todos = TodoStore::new(TodoApi::new(&config.api_url, http));

        Ok(Self {
            config,
            storage_dir,
            provider,
            auth,
            todos,
        })
    }

    fn require_session(&self) -> Result<()> {
        if !self.auth.is_authenticated() {
            bail!("Not signed in. Run `todo login` first.");
        }
        Ok(())
    }

    fn verifier_path(&self) -> PathBuf {
        self.storage_dir.join(VERIFIER_FILE)
    }

    fn state_path(&self) -> PathBuf {
        self.storage_dir.join(STATE_FILE)
    }

    fn clear_pending(&self) -> Result<()> {
        remove_if_present(&self.verifier_path())?;
        remove_if_present(&self.state_path())
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Login => {
                let request = self.start_login()?;
                println!("Open this URL in your browser to sign in:\n\n  {}\n", request.url);
                println!("Then run `todo callback '<redirect url>'` with the address you land on.");
                Ok(())
            }
            Commands::Callback { url } => self.callback(&url).await,
            Commands::List { filter } => {
                self.require_session()?;
                self.todos.fetch_todos().await.context("Failed to list todos")?;
                let visible = self.todos.visible(filter);
                if visible.is_empty() {
                    println!("No {filter} todos.");
                }
                for todo in &visible {
                    print_todo(todo);
                }
                let counts = self.todos.counts();
                println!(
                    "{} total, {} active, {} completed",
                    counts.all, counts.active, counts.completed
                );
                Ok(())
            }
            Commands::Add { title, done } => {
                self.require_session()?;
                if title.trim().is_empty() {
                    bail!("Title must not be empty");
                }
                let todo = self
                    .todos
                    .create_todo(CreateTodo {
                        title,
                        completed: done,
                    })
                    .await
                    .context("Failed to create todo")?;
                print_todo(&todo);
                Ok(())
            }
            Commands::Update {
                id,
                title,
                completed,
            } => {
                self.require_session()?;
                if title.is_none() && completed.is_none() {
                    bail!("Nothing to update: pass --title and/or --completed");
                }
                let todo = self
                    .todos
                    .update_todo(id, UpdateTodo { title, completed })
                    .await
                    .with_context(|| format!("Failed to update todo {id}"))?;
                print_todo(&todo);
                Ok(())
            }
            Commands::Toggle { id } => {
                self.require_session()?;
                let todo = self
                    .todos
                    .toggle_todo(id)
                    .await
                    .with_context(|| format!("Failed to toggle todo {id}"))?;
                print_todo(&todo);
                Ok(())
            }
            Commands::Delete { id } => {
                self.require_session()?;
                self.todos
                    .delete_todo(id)
                    .await
                    .with_context(|| format!("Failed to delete todo {id}"))?;
                println!("Deleted {id}");
                Ok(())
            }
            Commands::Whoami => {
                match self.auth.user() {
                    Some(user) if self.auth.is_authenticated() => {
                        println!("{} <{}>", user.name, user.email);
                        println!("id: {}", user.id);
                    }
                    _ => println!("Not signed in."),
                }
                Ok(())
            }
            Commands::Logout => {
                self.auth.sign_out();
                self.clear_pending()?;
                println!("Signed out.");
                Ok(())
            }
        }
    }

    /// Build the sign-in URL and keep its verifier and state for `callback`.
    fn start_login(&self) -> Result<AuthorizationRequest> {
        let request = self
            .provider
            .authorize_url(&self.config.callback_url())
            .context("Failed to build sign-in URL")?;
        fs::create_dir_all(&self.storage_dir)
            .with_context(|| format!("Failed to create {}", self.storage_dir.display()))?;
        fs::write(self.verifier_path(), &request.code_verifier)
            .context("Failed to save PKCE verifier")?;
        fs::write(self.state_path(), &request.state).context("Failed to save sign-in state")?;
        Ok(request)
    }

    async fn callback(&self, url: &str) -> Result<()> {
        let pending = parse_callback_code(url).context("Invalid callback URL")?;
        let user = match pending {
            Some(callback) => {
                let expected = fs::read_to_string(self.state_path())
                    .context("No pending sign-in. Run `todo login` first.")?;
                verify_state(expected.trim(), callback.state.as_deref())
                    .context("Callback does not belong to the last `todo login`")?;
                let verifier = fs::read_to_string(self.verifier_path())
                    .context("No pending sign-in. Run `todo login` first.")?;
                self.provider.set_code_verifier(verifier.trim());
                let response = self
                    .auth
                    .sign_in(&callback.code, &self.config.callback_url())
                    .await
                    .context("Failed to exchange authorization code")?;
                self.clear_pending()?;
                response.user
            }
            None => handle_oauth_callback(&self.auth, self.provider.as_ref(), url)
                .await
                .context("Authentication failed")?,
        };
        println!("Signed in as {} <{}>", user.name, user.email);
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn print_todo(todo: &Todo) {
    let mark = if todo.completed { "x" } else { " " };
    println!(
        "[{mark}] {}  {}  ({})",
        todo.id,
        todo.title,
        todo.updated_at.format("%Y-%m-%d %H:%M")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
    .context("Failed to load configuration")?;
    todo_core::logging::init_logging(&config.logging).context("Failed to initialize logging")?;
    debug!(api_url = %config.api_url, "configuration loaded");

    let app = App::build(config)?;
    app.auth.initialize().await;
    app.run(args.command).await
}
