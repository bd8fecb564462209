use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use macrolog::auth::SessionManager;
use macrolog::config::Config;
use macrolog::estimate::Estimator;
use macrolog::ledger::MealLedger;
use macrolog::models::{Meal, MealFields};
use macrolog::stores::SupabaseClient;

#[derive(Parser)]
#[command(name = "macrolog")]
#[command(version)]
#[command(about = "A nutrition tracking client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        /// Chosen username (must not look like an email)
        username: String,
        /// Email address
        email: String,
    },

    /// Sign in with an email or username
    Login {
        /// Email or username
        identifier: String,
    },

    /// Sign out and forget the saved session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Manage the meal ledger
    Meal(MealCommand),

    /// Show macro totals for a day
    Macros {
        /// Day to total, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Estimate macros for a described meal
    Estimate {
        /// Free-text meal description
        description: String,
        /// Also add the estimate to the ledger
        #[arg(long)]
        add: bool,
        /// Day to add it to, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Args)]
struct MealCommand {
    #[command(subcommand)]
    command: MealSubcommand,
}

#[derive(Subcommand)]
enum MealSubcommand {
    /// Record a meal
    Add {
        name: String,
        #[arg(long, default_value_t = 0.0)]
        calories: f64,
        #[arg(long, default_value_t = 0.0)]
        protein: f64,
        #[arg(long, default_value_t = 0.0)]
        carbs: f64,
        #[arg(long, default_value_t = 0.0)]
        fats: f64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List a day's meals
    List {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Edit a recorded meal
    Edit {
        /// Meal id (a unique prefix is enough)
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        calories: Option<f64>,
        #[arg(long)]
        protein: Option<f64>,
        #[arg(long)]
        carbs: Option<f64>,
        #[arg(long)]
        fats: Option<f64>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Delete a recorded meal
    Delete {
        /// Meal id (a unique prefix is enough)
        id: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// The wired-up core: one client behind every boundary.
struct App {
    config: Config,
    client: Arc<SupabaseClient>,
    manager: SessionManager,
    ledger: MealLedger,
}

async fn app(config: Config) -> Result<App, Box<dyn std::error::Error>> {
    let (Some(url), Some(key)) = (config.supabase_url.clone(), config.anon_key.clone()) else {
        return Err("Not configured. Set supabase_url and anon_key in the config file.".into());
    };

    let client = Arc::new(SupabaseClient::new(url, key));
    if let Some(session) = config.session.clone() {
        client.restore(session);
    }

    let manager = SessionManager::new(client.clone(), client.clone(), client.clone());
    manager.rehydrate().await;
    let ledger = MealLedger::new(client.clone(), manager.watch());

    Ok(App {
        config,
        client,
        manager,
        ledger,
    })
}

impl App {
    /// Persists (or clears) the client's session in the config file.
    fn save_session(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.config.session = self.client.current_session();
        self.config.save()?;
        Ok(())
    }
}

fn prompt_password() -> Result<String, io::Error> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    Ok(password.trim().to_string())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Finds a meal by id or unique id prefix.
fn find_meal<'a>(meals: &'a [Meal], id: &str) -> Result<&'a Meal, String> {
    if let Some(meal) = meals.iter().find(|m| m.id == id) {
        return Ok(meal);
    }
    let mut matches = meals.iter().filter(|m| m.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(meal), None) => Ok(meal),
        (Some(_), Some(_)) => Err(format!("meal id prefix '{}' is ambiguous", id)),
        (None, _) => Err(format!("no meal with id '{}'", id)),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config)?;
    let mut app = app(config).await?;

    match cli.command {
        Commands::Signup { username, email } => {
            let password = prompt_password()?;
            let user = app.manager.sign_up(&username, &email, &password).await?;
            app.save_session()?;
            println!("Account created. Signed in as {}", user);
        }

        Commands::Login { identifier } => {
            let password = prompt_password()?;
            let user = app.manager.sign_in(&identifier, &password).await?;
            app.save_session()?;
            println!("Signed in as {}", user);
        }

        Commands::Logout => {
            if let Err(e) = app.manager.sign_out().await {
                tracing::warn!("revocation failed, clearing local session anyway: {}", e);
            }
            app.save_session()?;
            println!("Signed out.");
        }

        Commands::Whoami => match app.manager.current_user() {
            Some(user) => println!("{}", user),
            None => println!("Not signed in. Run 'macrolog login' to authenticate."),
        },

        Commands::Meal(meal) => run_meal(&mut app, meal.command).await?,

        Commands::Macros { date } => {
            let date = date.unwrap_or_else(today);
            app.ledger.fetch(date).await?;
            println!("{}: {}", date, app.ledger.daily_macros());
        }

        Commands::Estimate {
            description,
            add,
            date,
        } => {
            let estimator = Estimator::new(
                app.config.supabase_url.clone().unwrap_or_default(),
                app.config.anon_key.clone().unwrap_or_default(),
            );
            let fields = estimator.estimate(&description).await;
            println!(
                "{}: {} kcal ({}g protein, {}g carbs, {}g fats)",
                fields.name, fields.calories, fields.protein, fields.carbs, fields.fats
            );

            if add {
                let date = date.unwrap_or_else(today);
                app.ledger.fetch(date).await?;
                let meal = app.ledger.add(fields, date).await?;
                println!("Added to {} as {}", date, meal.id);
            }
        }
    }

    Ok(())
}

async fn run_meal(
    app: &mut App,
    command: MealSubcommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        MealSubcommand::Add {
            name,
            calories,
            protein,
            carbs,
            fats,
            date,
        } => {
            let date = date.unwrap_or_else(today);
            app.ledger.fetch(date).await?;
            let fields = MealFields::new(name, calories, protein, carbs, fats);
            let meal = app.ledger.add(fields, date).await?;
            println!("Added {} ({})", meal, meal.id);
        }

        MealSubcommand::List { date } => {
            let date = date.unwrap_or_else(today);
            app.ledger.fetch(date).await?;
            let meals = app.ledger.meals();
            if meals.is_empty() {
                println!("No meals recorded for {}", date);
            } else {
                for meal in &meals {
                    println!("{}  {}", meal.id, meal);
                }
                println!("Total: {}", app.ledger.daily_macros());
            }
        }

        MealSubcommand::Edit {
            id,
            name,
            calories,
            protein,
            carbs,
            fats,
            date,
        } => {
            let date = date.unwrap_or_else(today);
            app.ledger.fetch(date).await?;
            let meals = app.ledger.meals();
            let meal = find_meal(&meals, &id)?.clone();

            let mut fields = meal.fields();
            if let Some(name) = name {
                fields.name = name;
            }
            if let Some(calories) = calories {
                fields.calories = calories;
            }
            if let Some(protein) = protein {
                fields.protein = protein;
            }
            if let Some(carbs) = carbs {
                fields.carbs = carbs;
            }
            if let Some(fats) = fats {
                fields.fats = fats;
            }

            let updated = app.ledger.edit(&meal, fields).await?;
            println!("Updated {}", updated);
        }

        MealSubcommand::Delete { id, date } => {
            let date = date.unwrap_or_else(today);
            app.ledger.fetch(date).await?;
            let meals = app.ledger.meals();
            let meal = find_meal(&meals, &id)?.clone();
            app.ledger.delete(&meal).await?;
            println!("Deleted {}", meal.name);
        }
    }

    Ok(())
}
