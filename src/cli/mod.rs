//! Interactive interpreter for the smartnest hub: connects over HTTP, keeps
//! the authenticated session in a durable local slot, and exposes device-tree
//! and user-management commands. Admin commands consult the access gate before
//! going to the wire so denials look the same offline as online.

pub mod connectivity;
pub mod outputformatter;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::auth::{evaluate_access, landing_path, AccessDecision, Role, SessionStore, UserRecord};
use connectivity::HttpSession;
use outputformatter::{print_users_table, print_value_table};

pub struct CliContext {
    pub session_store: SessionStore,
    pub remote: Option<HttpSession>,
}

impl CliContext {
    pub fn new(session_store: SessionStore) -> Self {
        Self { session_store, remote: None }
    }

    fn remote(&self) -> Result<&HttpSession> {
        self.remote
            .as_ref()
            .ok_or_else(|| anyhow!("not connected; use: connect <url> <email> <password>"))
    }

    /// Gate an admin command against the locally persisted session.
    fn admin_guard(&self) -> Result<()> {
        match evaluate_access(&self.session_store.load(), Some(Role::Admin)) {
            AccessDecision::Grant => Ok(()),
            AccessDecision::DenyToLogin => Err(anyhow!("not signed in; use connect first")),
            AccessDecision::DenyToLanding(role) => {
                Err(anyhow!("admin only; your area is {}", landing_path(role)))
            }
        }
    }
}

pub fn print_repl_help() {
    println!(
        "Commands:\n  connect <url> <email> <password>   sign in to a hub (e.g. http://127.0.0.1:8088)\n  status                             show session and connection info\n  get <path>                         read a device-tree path\n  set <path> <value>                 write a path (value parsed as JSON, else as a string)\n  del <path>                         delete a subtree\n  sensors                            typed snapshot of every sensor and switch\n  light on|off                       drive the light switch\n  pump on|off                        drive the water pump\n  users                              list credential records (admin)\n  useradd <email> <password> <name> <role> [key]   add/overwrite a user (admin)\n  userdel <key>                      delete a user (admin)\n  passwd <old> <new>                 change own password\n  clear dht|soil                     wipe a history subtree (admin)\n  watch <path> [n]                   stream changes (stop after n events)\n  logout                             end the session and clear the local slot\n  help                               show this help\n  quit | exit                        leave the interpreter"
    );
}

pub async fn run_repl(mut ctx: CliContext) -> Result<()> {
    let mut rl = rustyline::DefaultEditor::new()?;
    loop {
        let line = match rl.readline("smartnest> ") {
            Ok(l) => l,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(&line);
        if line == "quit" || line == "exit" {
            break;
        }
        if let Err(e) = dispatch(&mut ctx, &line).await {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

pub async fn dispatch(ctx: &mut CliContext, line: &str) -> Result<()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["help"] => {
            print_repl_help();
            Ok(())
        }
        ["connect", url, email, password] => {
            let (session, outcome) = HttpSession::connect(url, email, password).await?;
            ctx.session_store.save(outcome.user.clone(), outcome.user_key);
            ctx.remote = Some(session);
            println!("Welcome back, {}! ({})", outcome.user.name, outcome.landing);
            Ok(())
        }
        ["status"] => {
            let state = ctx.session_store.load();
            if state.is_authenticated {
                let user = state.user.as_ref();
                println!(
                    "signed in as {} <{}> role={} key={}",
                    user.map(|u| u.name.as_str()).unwrap_or("?"),
                    user.map(|u| u.email.as_str()).unwrap_or("?"),
                    user.map(|u| u.role.as_str()).unwrap_or("?"),
                    state.user_key.as_deref().unwrap_or("?"),
                );
            } else {
                println!("not signed in");
            }
            match &ctx.remote {
                Some(r) => println!("connected to {}", r.base()),
                None => println!("no hub connection"),
            }
            Ok(())
        }
        ["get", path] => {
            let v = ctx.remote()?.read_path(path).await?;
            println!("{}", serde_json::to_string_pretty(&v)?);
            Ok(())
        }
        ["set", path, rest @ ..] if !rest.is_empty() => {
            let raw = rest.join(" ");
            // JSON if it parses, otherwise a plain string (devices publish
            // bare "ON"/"OFF" and numbers)
            let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            ctx.remote()?.write_path(path, Some(value)).await?;
            println!("ok");
            Ok(())
        }
        ["del", path] => {
            ctx.remote()?.write_path(path, None).await?;
            println!("ok");
            Ok(())
        }
        ["sensors"] => {
            let v = ctx.remote()?.sensors().await?;
            print_value_table(&v);
            Ok(())
        }
        ["light", state] | ["pump", state] => {
            let on = match *state {
                "on" | "ON" => true,
                "off" | "OFF" => false,
                other => return Err(anyhow!("expected on|off, got {other}")),
            };
            let route = if tokens[0] == "light" { "/light" } else { "/pump" };
            ctx.remote()?.set_switch(route, on).await?;
            println!("{} turned {}", tokens[0], state.to_lowercase());
            Ok(())
        }
        ["users"] => {
            ctx.admin_guard()?;
            let v = ctx.remote()?.users().await?;
            match v {
                Value::Object(map) => {
                    let users: BTreeMap<String, UserRecord> = map
                        .into_iter()
                        .filter_map(|(k, raw)| {
                            serde_json::from_value::<UserRecord>(raw).ok().map(|u| (k, u))
                        })
                        .collect();
                    print_users_table(&users);
                }
                _ => println!("no credential table"),
            }
            Ok(())
        }
        ["useradd", email, password, name, role, rest @ ..] => {
            ctx.admin_guard()?;
            let role = match *role {
                "admin" => Role::Admin,
                "user" => Role::User,
                other => return Err(anyhow!("role must be admin or user, got {other}")),
            };
            let key = match rest {
                [key] => (*key).to_string(),
                [] => uuid::Uuid::new_v4().to_string(),
                _ => return Err(anyhow!("usage: useradd <email> <password> <name> <role> [key]")),
            };
            let record = UserRecord {
                email: (*email).to_string(),
                password: (*password).to_string(),
                name: (*name).to_string(),
                role,
            };
            ctx.remote()?.add_user(&key, &record).await?;
            println!("added user at key {}", key);
            Ok(())
        }
        ["userdel", key] => {
            ctx.admin_guard()?;
            ctx.remote()?.delete_user(key).await?;
            println!("deleted {}", key);
            Ok(())
        }
        ["passwd", old, new] => {
            ctx.remote()?.change_password(old, new).await?;
            // keep the local slot consistent with the remote record
            if let Some(key) = ctx.session_store.load().user_key {
                ctx.session_store.refresh_password(&key, new);
            }
            println!("password changed");
            Ok(())
        }
        ["clear", which @ ("dht" | "soil")] => {
            ctx.admin_guard()?;
            ctx.remote()?.clear_history(which).await?;
            println!("cleared {} history", which);
            Ok(())
        }
        ["watch", path, rest @ ..] => {
            let limit = match rest {
                [] => None,
                [n] => Some(n.parse::<usize>().map_err(|_| anyhow!("watch count must be a number"))?),
                _ => return Err(anyhow!("usage: watch <path> [n]")),
            };
            ctx.remote()?
                .watch(path, limit, |event| println!("{}", event))
                .await
        }
        ["logout"] => {
            if let Some(remote) = ctx.remote.take() {
                if let Err(e) = remote.logout().await {
                    eprintln!("remote logout failed: {e}");
                }
            }
            ctx.session_store.clear();
            println!("logged out");
            Ok(())
        }
        _ => Err(anyhow!("unknown command; try help")),
    }
}
