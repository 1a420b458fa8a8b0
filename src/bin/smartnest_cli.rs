//!
//! smartnest CLI binary
//! --------------------
//! Command-line tool and interactive interpreter for a remote smartnest hub.
//! Holds the authenticated session in a durable local file so a later run of
//! the tool (or a one-shot command) starts out signed in.

use std::env;

use anyhow::Result;

use smartnest::auth::SessionStore;
use smartnest::cli::{dispatch, print_repl_help, run_repl, CliContext};
use smartnest::cli::connectivity::HttpSession;

const DEFAULT_SESSION_FILE: &str = ".smartnest_session.json";

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --repl [--connect <url> --user <email> --password <p>] [--session <file>]\n  {program} --connect <url> --user <email> --password <p> -c \"<command>\" [--session <file>]\n\nFlags:\n  --connect <url>          Hub base URL, e.g. http://127.0.0.1:8088\n  --user <email>           Login email (required with --connect)\n  --password <p>           Login password (required with --connect)\n  --session <file>         Session slot file (default: {DEFAULT_SESSION_FILE}, or SMARTNEST_SESSION_FILE)\n  -c, --command <cmd>      Run one interpreter command and exit\n  --repl                   Start interactive mode (default when no -c given)\n  -h, --help               Show this help\n\nExamples:\n  {program} --connect http://127.0.0.1:8088 --user admin@smartnest.local --password smartnest --repl\n  {program} --connect http://127.0.0.1:8088 --user admin@smartnest.local --password smartnest -c \"sensors\"\n  {program} -c \"get DHT11\""
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    println!(r"   _____                      __  _   __          __
  / ___/____ ___  ____ ______/ /_/ | / /__  _____/ /_
  \__ \/ __ `__ \/ __ `/ ___/ __/  |/ / _ \/ ___/ __/
 ___/ / / / / / / /_/ / /  / /_/ /|  /  __(__  ) /_
/____/_/ /_/ /_/\__,_/_/   \__/_/ |_/\___/____/\__/
              Command Line Interface");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut connect_url: Option<String> = None;
    let mut connect_user: Option<String> = None;
    let mut connect_password: Option<String> = None;
    let mut session_file: Option<String> = None;
    let mut one_shot: Option<String> = None;
    let mut repl = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--connect" => {
                if i + 1 >= args.len() { eprintln!("--connect requires a URL"); print_usage(&program); std::process::exit(2); }
                connect_url = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--user" => {
                if i + 1 >= args.len() { eprintln!("--user requires a value"); print_usage(&program); std::process::exit(2); }
                connect_user = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--password" => {
                if i + 1 >= args.len() { eprintln!("--password requires a value"); print_usage(&program); std::process::exit(2); }
                connect_password = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--session" => {
                if i + 1 >= args.len() { eprintln!("--session requires a value"); print_usage(&program); std::process::exit(2); }
                session_file = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--command" | "-c" => {
                if i + 1 >= args.len() { eprintln!("--command requires a value"); print_usage(&program); std::process::exit(2); }
                one_shot = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--repl" => { repl = true; i += 1; continue; }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                eprintln!("unknown flag: {other}");
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let session_file = session_file
        .or_else(|| env::var("SMARTNEST_SESSION_FILE").ok())
        .unwrap_or_else(|| DEFAULT_SESSION_FILE.to_string());
    let mut ctx = CliContext::new(SessionStore::file(&session_file));

    if let Some(url) = connect_url {
        let (Some(user), Some(password)) = (connect_user, connect_password) else {
            eprintln!("--connect requires --user and --password");
            print_usage(&program);
            std::process::exit(2);
        };
        let (session, outcome) = HttpSession::connect(&url, &user, &password).await?;
        ctx.session_store.save(outcome.user.clone(), outcome.user_key);
        ctx.remote = Some(session);
        println!("Welcome back, {}! ({})", outcome.user.name, outcome.landing);
    }

    match one_shot {
        Some(cmd) => dispatch(&mut ctx, &cmd).await,
        None => {
            if !repl {
                print_repl_help();
            }
            run_repl(ctx).await
        }
    }
}
