use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser as ClapParser, Subcommand};
use lowcode_renderer::{
    ComponentRegistry, DesignMode, DocumentHost, MemoryDocument, Messages, RenderError, RenderRoot, RendererProps,
    RuntimeScope, Scheduler, SchemaNode, SchemaParser, SchemaParserOptions, SystemClock, Value,
};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "lowcode")]
#[command(about = "Low-code schema renderer CLI")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a schema file and print the resulting tree as JSON
    Render {
        /// Path to the schema JSON
        schema: PathBuf,
        /// Component registry JSON: `{ "Name": { "kind": "plain", "options": {} } }`
        #[arg(long)]
        components: Option<PathBuf>,
        /// Scope JSON object
        #[arg(long)]
        scope: Option<PathBuf>,
        /// Messages JSON: `{ "locale": { "key": "template" } }`
        #[arg(long)]
        messages: Option<PathBuf>,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        device: Option<String>,
        #[arg(long, default_value_t = DesignMode::Live)]
        design_mode: DesignMode,
        /// Let expressions read the scope without `this`
        #[arg(long)]
        lenient: bool,
    },
    /// Compile every expression in a schema file without rendering
    Check {
        /// Path to the schema JSON
        schema: PathBuf,
    },
    /// Evaluate one expression; `this` is the scope object
    Eval {
        expression: String,
        /// Scope as inline JSON
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        lenient: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Render {
            schema,
            components,
            scope,
            messages,
            locale,
            device,
            design_mode,
            lenient,
        } => render(RenderArgs {
            schema,
            components,
            scope,
            messages,
            locale,
            device,
            design_mode,
            lenient,
        }),
        Commands::Check { schema } => check(&schema),
        Commands::Eval {
            expression,
            scope,
            lenient,
        } => eval(&expression, scope.as_deref(), lenient),
    };
    match result {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json(path: &Path) -> Result<JsonValue, String> {
    let text = fs::read_to_string(path).map_err(|error| format!("Error reading {}: {error}", path.display()))?;
    serde_json::from_str(&text).map_err(|error| format!("Invalid JSON in {}: {error}", path.display()))
}

struct RenderArgs {
    schema: PathBuf,
    components: Option<PathBuf>,
    scope: Option<PathBuf>,
    messages: Option<PathBuf>,
    locale: Option<String>,
    device: Option<String>,
    design_mode: DesignMode,
    lenient: bool,
}

fn render(args: RenderArgs) -> Result<ExitCode, String> {
    let document = MemoryDocument::from_json(&read_json(&args.schema)?).map_err(|error| error.to_string())?;
    let components = match &args.components {
        Some(path) => ComponentRegistry::from_json(&read_json(path)?)
            .map_err(|error| format!("Invalid component registry: {error}"))?,
        None => ComponentRegistry::new(),
    };
    let scope = match &args.scope {
        Some(path) => RuntimeScope::from_json(&read_json(path)?),
        None => RuntimeScope::default(),
    };
    let messages: Messages = match &args.messages {
        Some(path) => serde_json::from_value(read_json(path)?).map_err(|error| format!("Invalid messages: {error}"))?,
        None => Messages::new(),
    };

    let mut props = RendererProps::new(document.root(), components)
        .with_scope(scope)
        .with_messages(messages)
        .with_design_mode(args.design_mode)
        .with_get_node(document.get_node_fn())
        .with_this_required_in_jse(!args.lenient);
    if let Some(locale) = args.locale {
        props = props.with_locale(locale);
    }
    if let Some(device) = args.device {
        props = props.with_device(device);
    }

    let scheduler = Scheduler::new(Rc::new(SystemClock::new()));
    info!(schema = %args.schema.display(), "rendering");
    let root = RenderRoot::mount(&scheduler, props).map_err(|error| describe(&error))?;
    root.attach_document(Rc::new(document.clone()) as Rc<dyn DocumentHost>);
    root.render().map_err(|error| describe(&error))?;
    debug!(instances = document.mount_calls(), "instances reported to the document");

    let tree = root.with_tree(|tree| tree.map(|tree| tree.to_json()).unwrap_or(JsonValue::Null));
    root.unmount();
    let output = serde_json::to_string_pretty(&tree).map_err(|error| error.to_string())?;
    println!("{output}");
    Ok(ExitCode::SUCCESS)
}

fn describe(error: &RenderError) -> String {
    let mut message = format!("Render failed: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    message
}

fn check(path: &Path) -> Result<ExitCode, String> {
    eprintln!("Checking: {}", path.display());
    let schema = SchemaNode::from_json(&read_json(path)?).map_err(|error| format!("Invalid schema: {error}"))?;
    let diagnostics = SchemaParser::detached(SchemaParserOptions::default()).check(&schema);
    if diagnostics.is_empty() {
        eprintln!("OK: every expression compiles");
        return Ok(ExitCode::SUCCESS);
    }
    for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic.error.report(&diagnostic.location, &diagnostic.source));
    }
    eprintln!("{} expression(s) failed to compile", diagnostics.len());
    Ok(ExitCode::FAILURE)
}

fn root_scope(json: &JsonValue) -> RuntimeScope {
    let scope = RuntimeScope::from_json(json);
    let this = Value::Object(Rc::new(scope.to_object()));
    scope.with_this(this)
}

fn eval(expression: &str, scope: Option<&str>, lenient: bool) -> Result<ExitCode, String> {
    let scope = match scope {
        Some(json) => root_scope(&serde_json::from_str(json).map_err(|error| format!("Invalid scope JSON: {error}"))?),
        None => root_scope(&JsonValue::Object(Default::default())),
    };
    let parser = SchemaParser::detached(SchemaParserOptions { this_required: !lenient });
    match parser.evaluate(expression, &scope) {
        Ok(value) => {
            println!("{}", value.to_json());
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            eprintln!("{}", error.report("expression", expression));
            Ok(ExitCode::FAILURE)
        }
    }
}
