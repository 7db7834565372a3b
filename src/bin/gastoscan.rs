//! CLI binary for gastoscan.
//!
//! Loads one receipt, extracts it, lets the user correct the form on the
//! terminal and appends the confirmed row. Every step is a library call on a
//! single [`Session`].

use anyhow::{Context, Result};
use clap::Parser;
use gastoscan::record::coerce_amount;
use gastoscan::{
    Category, Currency, ExpenseForm, ExtractionFailure, Receipt, ReceiptSource, Resolution,
    ScanConfig, Scanner, Session,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Spinner shown while a network or rendering call is in flight.
fn spinner(enabled: bool, prefix: &'static str, msg: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(prefix);
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract, review on the terminal, save on confirmation
  gastoscan ticket.jpg

  # First page of a PDF invoice, straight to the sheet
  gastoscan --save --no-input factura.pdf

  # Correct the category before saving
  gastoscan --categoria Supermercado --save --no-input ticket.jpg

  # Machine-readable output, no saving
  gastoscan --json ticket.png

  # What can this key use?
  gastoscan --list-models

FORM FIELDS:
  fecha        DD/MM/YYYY as printed on the receipt
  monto        total amount, e.g. 1234.50 or 1.234,50
  moneda       ARS (default) | USD
  descripcion  business name or short description
  categoria    Comida | Servicios | Supermercado | Transporte | Otros (default)
  metodo-pago  free text (only saved when the column layout includes it)

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY               Google Gemini API key (required)
  GASTOSCAN_MODEL              Fixed model, skips model listing
  GASTOSCAN_MODEL_PREFERENCES  Preference list, e.g. gemini-2.0-flash!lite,gemini-1.5-pro
  GASTOSCAN_FALLBACK_MODEL     Model used when listing fails (default gemini-2.0-flash)
  GCP_SERVICE_ACCOUNT_JSON     Service-account key JSON; enables saving
  GASTOSCAN_SPREADSHEET        Spreadsheet name (default GastoScanner)
  GASTOSCAN_SPREADSHEET_ID     Spreadsheet id, skips the Drive lookup
  GASTOSCAN_WORKSHEET          Worksheet name (default Gastos)
  GASTOSCAN_COLUMNS            Column layout (default fecha,monto,moneda,descripcion,categoria)
  PDFIUM_LIB_PATH              libpdfium file or directory, for PDF receipts
"#;

/// Extract expenses from receipt photos and PDFs into a spreadsheet.
#[derive(Parser, Debug)]
#[command(
    name = "gastoscan",
    version,
    about = "Extract expenses from receipt photos and PDFs into a spreadsheet",
    long_about = "Send a receipt photo (PNG/JPEG) or the first page of a PDF to a Gemini \
vision model, review the extracted expense, and append it as one row to a Google Sheets \
worksheet.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Receipt file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "list_models")]
    input: Option<String>,

    /// Use this model instead of resolving one from the listing.
    #[arg(long)]
    model: Option<String>,

    /// Print the models this key can see and exit.
    #[arg(long)]
    list_models: bool,

    /// Append the row without asking.
    #[arg(long, env = "GASTOSCAN_SAVE")]
    save: bool,

    /// Never prompt; use the extracted values plus any overrides.
    #[arg(long, env = "GASTOSCAN_NO_INPUT")]
    no_input: bool,

    /// Print the receipt, model and form as JSON.
    #[arg(long)]
    json: bool,

    /// Write the image sent to the model to this file, or into this
    /// directory as `receipt.png` / `receipt.jpg`.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Override the extracted date.
    #[arg(long)]
    fecha: Option<String>,

    /// Override the extracted amount.
    #[arg(long)]
    monto: Option<String>,

    /// Override the currency (ARS, USD).
    #[arg(long)]
    moneda: Option<Currency>,

    /// Override the description.
    #[arg(long)]
    descripcion: Option<String>,

    /// Override the category.
    #[arg(long)]
    categoria: Option<Category>,

    /// Override the payment method.
    #[arg(long)]
    metodo_pago: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "GASTOSCAN_TEMPERATURE")]
    temperature: Option<f32>,

    /// Resolve the model before every extraction instead of once.
    #[arg(long, env = "GASTOSCAN_RESOLVE_PER_CALL")]
    resolve_per_call: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GASTOSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the final result.
    #[arg(short, long, env = "GASTOSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = ScanConfig::from_env().context("Invalid configuration")?;
    if let Some(ref model) = cli.model {
        config.model = Some(model.clone());
    }
    if let Some(t) = cli.temperature {
        config.temperature = t.clamp(0.0, 2.0);
    }
    config.resolve_per_call |= cli.resolve_per_call;

    let scanner = Scanner::new(config);
    let show_progress = !cli.quiet && !cli.json;

    if cli.list_models {
        return list_models(&scanner, cli.json, show_progress).await;
    }

    let input = cli
        .input
        .as_deref()
        .context("A receipt path or URL is required")?;
    let interactive = !cli.no_input && !cli.json && io::stdin().is_terminal();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut session = Session::new();

    // ── Load ─────────────────────────────────────────────────────────────
    let bar = spinner(show_progress, "Loading", input);
    let loaded = scanner.load(&mut session, input).await;
    bar.finish_and_clear();
    let receipt = loaded.context("Failed to load receipt")?;

    if !cli.quiet && !cli.json {
        eprintln!("{} {}", cyan("◆"), describe(receipt));
    }
    if let Some(ref target) = cli.preview {
        let path = if target.is_dir() {
            target.join(format!("receipt.{}", receipt.extension()))
        } else {
            target.clone()
        };
        tokio::fs::write(&path, &receipt.bytes)
            .await
            .with_context(|| format!("Failed to write preview to {:?}", path))?;
        if !cli.quiet && !cli.json {
            eprintln!("  {} preview written to {}", dim("·"), path.display());
        }
    }

    // ── Extract ──────────────────────────────────────────────────────────
    let (resolution, failure) = loop {
        let bar = spinner(show_progress, "Model", "resolving…");
        let resolution = scanner.resolve_model(&mut session).await;
        bar.set_prefix("Extracting");
        bar.set_message(resolution.model().to_string());
        let result = scanner.extract_with(&mut session, &resolution).await;
        bar.finish_and_clear();

        match result {
            Ok(_) => {
                if !cli.quiet && !cli.json {
                    eprintln!("{} extracted with {}", green("✔"), describe_model(&resolution));
                }
                break (resolution, None);
            }
            Err(e) => {
                eprintln!("{} {}", red("✘"), e);
                if interactive && confirm(&mut stdin, "Retry extraction?").await? {
                    continue;
                }
                if !cli.quiet && !cli.json {
                    eprintln!("  {} fill in the form by hand", dim("·"));
                }
                break (resolution, Some(e));
            }
        }
    };

    // ── Form ─────────────────────────────────────────────────────────────
    let mut form = session.form();
    apply_overrides(&cli, &mut form)?;

    if cli.json {
        print_json(&session, &resolution, failure.as_ref(), &form)?;
    }

    let wants_save = if interactive {
        review(&mut stdin, &mut form).await?
    } else {
        if !cli.json {
            print_form(&form);
        }
        cli.save
    };

    if !wants_save {
        return Ok(());
    }

    // ── Save ─────────────────────────────────────────────────────────────
    loop {
        let bar = spinner(show_progress, "Saving", "appending row…");
        let saved = scanner.save(&mut session, &form).await;
        bar.finish_and_clear();

        match saved {
            Ok(row) => {
                if !cli.quiet {
                    eprintln!(
                        "{} saved to {}",
                        green("✔"),
                        bold(row.updated_range.as_deref().unwrap_or(&row.spreadsheet_id))
                    );
                }
                return Ok(());
            }
            Err(e) => {
                eprintln!("{} {}", red("✘"), e);
                if interactive && scanner.can_save() && confirm(&mut stdin, "Retry save?").await? {
                    continue;
                }
                return Err(anyhow::Error::new(e).context("Row was not saved"));
            }
        }
    }
}

async fn list_models(scanner: &Scanner, json: bool, show_progress: bool) -> Result<()> {
    let bar = spinner(show_progress, "Listing", "models…");
    let listed = scanner.list_models().await;
    bar.finish_and_clear();
    let models = listed
        .map_err(anyhow::Error::msg)
        .context("Model listing failed")?;

    if json {
        let rows: Vec<Value> = models
            .iter()
            .map(|m| json!({ "id": m.id, "generate": m.can_generate() }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("Failed to serialise models")?
        );
    } else {
        for m in &models {
            if m.can_generate() {
                println!("{}", m.id);
            } else {
                println!("{}", dim(&format!("{}  (no generateContent)", m.id)));
            }
        }
    }
    Ok(())
}

fn describe(receipt: &Receipt) -> String {
    let kind = match receipt.source {
        ReceiptSource::Image => "image",
        ReceiptSource::PdfFirstPage => "PDF page 1",
    };
    format!(
        "{}  {}  {}",
        bold(&receipt.name),
        kind,
        dim(&format!(
            "{}x{}  {} KB",
            receipt.width,
            receipt.height,
            receipt.bytes.len() / 1024
        ))
    )
}

fn describe_model(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Preferred { model, rank } => {
            format!("{} {}", bold(model), dim(&format!("(preference #{})", rank + 1)))
        }
        Resolution::FirstAvailable { model } => {
            format!("{} {}", bold(model), dim("(first available)"))
        }
        Resolution::Fallback { model, reason } => {
            format!("{} {}", bold(model), dim(&format!("(fallback: {reason})")))
        }
        Resolution::Fixed { model } => bold(model),
    }
}

fn apply_overrides(cli: &Cli, form: &mut ExpenseForm) -> Result<()> {
    if let Some(ref v) = cli.fecha {
        form.fecha = v.trim().to_string();
    }
    if let Some(ref v) = cli.monto {
        form.monto = parse_monto(v)?;
    }
    if let Some(v) = cli.moneda {
        form.moneda = v;
    }
    if let Some(ref v) = cli.descripcion {
        form.descripcion = v.trim().to_string();
    }
    if let Some(v) = cli.categoria {
        form.categoria = v;
    }
    if let Some(ref v) = cli.metodo_pago {
        form.metodo_pago = v.trim().to_string();
    }
    Ok(())
}

fn parse_monto(s: &str) -> Result<f64> {
    coerce_amount(&Value::String(s.to_string()))
        .with_context(|| format!("Invalid amount: '{}'", s.trim()))
}

fn print_json(
    session: &Session,
    resolution: &Resolution,
    failure: Option<&ExtractionFailure>,
    form: &ExpenseForm,
) -> Result<()> {
    let receipt = session.receipt().map(|r| {
        json!({
            "name": r.name,
            "source": r.source,
            "mime_type": r.mime_type,
            "width": r.width,
            "height": r.height,
        })
    });
    let out = json!({
        "receipt": receipt,
        "model": resolution.model(),
        "record": session.pending(),
        "failure": failure,
        "form": form,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&out).context("Failed to serialise output")?
    );
    Ok(())
}

// ── Interactive review ───────────────────────────────────────────────────────

fn print_form(form: &ExpenseForm) {
    let options = |all: &[&str], selected: &str| {
        all.iter()
            .map(|o| {
                if *o == selected {
                    bold(&format!("[{o}]"))
                } else {
                    dim(o)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    let currencies: Vec<&str> = Currency::ALL.iter().map(Currency::as_str).collect();
    let categories: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();

    eprintln!();
    eprintln!("  1 fecha        {}", form.fecha);
    eprintln!("  2 monto        {:.2}", form.monto);
    eprintln!("  3 moneda       {}", options(&currencies[..], form.moneda.as_str()));
    eprintln!("  4 descripcion  {}", form.descripcion);
    eprintln!("  5 categoria    {}", options(&categories[..], form.categoria.as_str()));
    eprintln!("  6 metodo pago  {}", form.metodo_pago);
    eprintln!();
}

async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<Option<String>> {
    eprint!("{question} ");
    io::stderr().flush().ok();
    let line = stdin.next_line().await.context("Failed to read stdin")?;
    Ok(line.map(|l| l.trim().to_string()))
}

async fn confirm(stdin: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<bool> {
    let answer = prompt(stdin, &format!("{question} [y/N]")).await?;
    Ok(matches!(
        answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("y" | "yes" | "s" | "si" | "sí")
    ))
}

/// Edit loop. Returns true when the user asks to save.
async fn review(stdin: &mut Lines<BufReader<Stdin>>, form: &mut ExpenseForm) -> Result<bool> {
    loop {
        print_form(form);
        let Some(choice) = prompt(stdin, &format!("Edit 1-6, {} save, {} quit:", bold("s"), bold("q"))).await? else {
            return Ok(false);
        };

        match choice.as_str() {
            "s" | "S" => return Ok(true),
            "q" | "Q" => return Ok(false),
            "1" | "2" | "3" | "4" | "5" | "6" => {
                let Some(value) = prompt(stdin, "  new value:").await? else {
                    return Ok(false);
                };
                if let Err(e) = edit_field(form, &choice, &value) {
                    eprintln!("  {} {}", red("✘"), e);
                }
            }
            "" => {}
            other => eprintln!("  {} unknown option '{}'", red("✘"), other),
        }
    }
}

fn edit_field(form: &mut ExpenseForm, field: &str, value: &str) -> Result<()> {
    match field {
        "1" => form.fecha = value.to_string(),
        "2" => form.monto = parse_monto(value)?,
        "3" => form.moneda = value.parse().map_err(anyhow::Error::msg)?,
        "4" => form.descripcion = value.to_string(),
        "5" => form.categoria = value.parse().map_err(anyhow::Error::msg)?,
        "6" => form.metodo_pago = value.to_string(),
        _ => anyhow::bail!("unknown field '{field}'"),
    }
    Ok(())
}
