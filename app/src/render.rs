use crate::config::OutputFormat;
use anyhow::Result;
use serde::Serialize;
use statusdeck_core::auth::AuthState;
use statusdeck_core::models::{ProcessInfo, ServiceSummary, TerminateResponse, UserProfile};
use std::fmt::Write;

pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn services(format: OutputFormat, services: &[ServiceSummary]) -> Result<String> {
    if format == OutputFormat::Json {
        return json(services);
    }
    if services.is_empty() {
        return Ok("no services".to_string());
    }
    let mut out = String::new();
    for service in services {
        writeln!(
            out,
            "{:<16} {:<24} {:<9} users={:<4} processes={}",
            service.id, service.name, service.status, service.active_users, service.active_processes
        )?;
        for issue in service.issues.iter().flatten() {
            writeln!(out, "    ! {issue}")?;
        }
    }
    Ok(out.trim_end().to_string())
}

pub fn users(format: OutputFormat, users: &[UserProfile]) -> Result<String> {
    if format == OutputFormat::Json {
        return json(users);
    }
    if users.is_empty() {
        return Ok("no users".to_string());
    }
    let mut out = String::new();
    for user in users {
        let active = match user.active {
            Some(true) => "active",
            Some(false) => "inactive",
            None => "-",
        };
        writeln!(out, "{:<16} {:<24} {}", user.id, user.label(), active)?;
    }
    Ok(out.trim_end().to_string())
}

pub fn processes(format: OutputFormat, processes: &[ProcessInfo]) -> Result<String> {
    if format == OutputFormat::Json {
        return json(processes);
    }
    if processes.is_empty() {
        return Ok("no processes".to_string());
    }
    let mut out = String::new();
    for process in processes {
        let cpu = process
            .cpu_percent
            .map(|cpu| format!("{cpu:.1}%"))
            .unwrap_or_else(|| "-".to_string());
        let mem = process
            .memory_percent
            .map(|mem| format!("{mem:.1}%"))
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:<8} {:<24} {:<12} cpu={cpu} mem={mem}",
            process.pid.to_string(),
            process.name,
            process.user
        )?;
    }
    Ok(out.trim_end().to_string())
}

pub fn session(format: OutputFormat, state: &AuthState) -> Result<String> {
    if format == OutputFormat::Json {
        return json(state);
    }
    if !state.is_authenticated() {
        return Ok("not signed in".to_string());
    }
    Ok(match state.user() {
        Some(user) => {
            let roles: Vec<String> = user
                .roles
                .iter()
                .map(|role| format!("{role:?}").to_lowercase())
                .collect();
            format!("signed in as {} ({}) roles=[{}]", user.label(), user.id, roles.join(","))
        }
        None => "signed in (profile unavailable)".to_string(),
    })
}

pub fn termination(format: OutputFormat, response: &TerminateResponse) -> Result<String> {
    if format == OutputFormat::Json {
        return json(response);
    }
    let outcome = if response.success { "terminated" } else { "not terminated" };
    let target = format!("{:?}", response.target_type).to_lowercase();
    let mut line = format!("{target} {} {outcome}", response.target_id);
    if let Some(message) = &response.message {
        line.push_str(": ");
        line.push_str(message);
    }
    Ok(line)
}
