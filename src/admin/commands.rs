//! Admin commands, addressed as `/serveradmin/sfcommand/<Name>`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::admin::CREATE_ACCOUNT_ROOT;
use crate::config::validation::is_valid_address;
use crate::config::{DomainConfig, ParameterError};
use crate::context::ServerContext;
use crate::domain::Domain;
use crate::lifecycle::control::{ControlCommand, ADMIN_ACTION_DELAY};
use crate::pipeline::FormFields;
use crate::security::{Action, Blacklist};

/// Form field naming the domain a command applies to.
pub const DOMAIN_NAME_FIELD: &str = "DomainName";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    SetRoot,
    SetParameter,
    SaveParameters,
    ReadParameters,
    Restart,
    Quit,
    CancelQuit,
    ConfirmedQuit,
    UpdateDomain,
    UpdateDomainServices,
    DeleteDomain,
    CreateDomain,
    SaveDomains,
    ReadDomains,
    ResetDomainTelemetry,
    UpdateBlacklist,
    AddToBlacklist,
    RemoveFromBlacklist,
    SaveBlacklist,
    ReadBlacklist,
    UpdateDomainBlacklist,
    AddToDomainBlacklist,
    RemoveFromDomainBlacklist,
}

/// Returned for a command name that is not known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown admin command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for AdminCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AdminCommand::*;
        Ok(match s {
            "SetRoot" => SetRoot,
            "SetParameter" => SetParameter,
            "SaveParameters" => SaveParameters,
            "ReadParameters" => ReadParameters,
            "Restart" => Restart,
            "Quit" => Quit,
            "CancelQuit" => CancelQuit,
            "ConfirmedQuit" => ConfirmedQuit,
            "UpdateDomain" => UpdateDomain,
            "UpdateDomainServices" => UpdateDomainServices,
            "DeleteDomain" => DeleteDomain,
            "CreateDomain" => CreateDomain,
            "SaveDomains" => SaveDomains,
            "ReadDomains" => ReadDomains,
            "ResetDomainTelemetry" => ResetDomainTelemetry,
            "UpdateBlacklist" => UpdateBlacklist,
            "AddToBlacklist" => AddToBlacklist,
            "RemoveFromBlacklist" => RemoveFromBlacklist,
            "SaveBlacklist" => SaveBlacklist,
            "ReadBlacklist" => ReadBlacklist,
            "UpdateDomainBlacklist" => UpdateDomainBlacklist,
            "AddToDomainBlacklist" => AddToDomainBlacklist,
            "RemoveFromDomainBlacklist" => RemoveFromDomainBlacklist,
            other => return Err(UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AdminCommand {
    /// Admin site page shown after the command. Empty means the site index.
    pub fn target_page(&self) -> &'static str {
        use AdminCommand::*;
        match self {
            SetRoot | CancelQuit => "",
            SetParameter | SaveParameters | ReadParameters => "/pages/parameters.sf.html",
            Restart => "/pages/restart.sf.html",
            Quit => "/pages/quit.sf.html",
            ConfirmedQuit => "/pages/bye.sf.html",
            UpdateDomain | UpdateDomainServices | DeleteDomain | CreateDomain | SaveDomains
            | ReadDomains | ResetDomainTelemetry | UpdateDomainBlacklist | AddToDomainBlacklist
            | RemoveFromDomainBlacklist => "/pages/domain-management.sf.html",
            UpdateBlacklist | AddToBlacklist | RemoveFromBlacklist | SaveBlacklist
            | ReadBlacklist => "/pages/blacklist.sf.html",
        }
    }

    /// Run the command. Problems are logged; the follow-up page is shown regardless.
    pub fn execute(self, server: &ServerContext, fields: &mut FormFields) {
        tracing::info!(command = %self, "Admin command");
        use AdminCommand::*;
        match self {
            SetRoot => set_root(server, fields),
            SetParameter => set_parameters(server, fields),
            SaveParameters | SaveDomains | SaveBlacklist => save(server),
            ReadParameters => log_failure(server.reload_parameters(), "read parameters"),
            ReadDomains => log_failure(server.reload_domains(), "read domains"),
            ReadBlacklist => log_failure(server.reload_blacklist(), "read blacklist"),
            Restart => server.control().schedule(ControlCommand::Restart, ADMIN_ACTION_DELAY),
            Quit | CancelQuit => {}
            ConfirmedQuit => server.control().schedule(ControlCommand::Quit, ADMIN_ACTION_DELAY),
            UpdateDomain => update_domain(server, fields),
            UpdateDomainServices => update_domain_services(server, fields),
            DeleteDomain => delete_domain(server, fields),
            CreateDomain => create_domain(server, fields),
            ResetDomainTelemetry => {
                if let Some(domain) = named_domain(server, fields) {
                    domain.telemetry().reset();
                    domain.clear_404_log();
                }
            }
            UpdateBlacklist => update_blacklist(server.blacklist(), fields),
            AddToBlacklist => add_to_blacklist(server.blacklist(), fields),
            RemoveFromBlacklist => remove_from_blacklist(server.blacklist(), fields),
            UpdateDomainBlacklist => {
                if let Some(domain) = take_named_domain(server, fields) {
                    update_blacklist(domain.blacklist(), fields);
                }
            }
            AddToDomainBlacklist => {
                if let Some(domain) = take_named_domain(server, fields) {
                    add_to_blacklist(domain.blacklist(), fields);
                }
            }
            RemoveFromDomainBlacklist => {
                if let Some(domain) = take_named_domain(server, fields) {
                    remove_from_blacklist(domain.blacklist(), fields);
                }
            }
        }
    }
}

fn log_failure<E: fmt::Display>(result: Result<(), E>, what: &str) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Cannot {}", what);
    }
}

fn save(server: &ServerContext) {
    log_failure(server.save_configuration(), "save configuration");
}

fn set_root(server: &ServerContext, fields: &FormFields) {
    let Some(root) = fields.get(CREATE_ACCOUNT_ROOT) else {
        tracing::error!("SetRoot without a root directory");
        return;
    };
    log_failure(server.set_parameter("admin_site_root", root), "set admin site root");
    tracing::info!(root = %root, "Admin site root set");
    save(server);
}

fn set_parameters(server: &ServerContext, fields: &FormFields) {
    if fields.is_empty() {
        tracing::error!("SetParameter without fields");
    }
    for (name, value) in fields.iter().filter(|(name, _)| *name != "submit") {
        match server.set_parameter(name, value) {
            Ok(()) => tracing::info!(parameter = %name, value = %value, "Parameter set"),
            Err(ParameterError::Unknown(name)) => {
                tracing::error!(parameter = %name, "Unknown parameter name")
            }
            Err(e) => tracing::error!(error = %e, "Parameter not set"),
        }
    }
}

/// Domain named by the `DomainName` field, left in place.
fn named_domain(server: &ServerContext, fields: &FormFields) -> Option<std::sync::Arc<Domain>> {
    let Some(name) = fields.get(DOMAIN_NAME_FIELD) else {
        tracing::error!("Missing domain name");
        return None;
    };
    let domain = server.domains().get(name);
    if domain.is_none() {
        tracing::error!(domain = %name, "Domain does not exist");
    }
    domain
}

/// Domain named by the `DomainName` field, which is removed from `fields`.
fn take_named_domain(server: &ServerContext, fields: &mut FormFields) -> Option<std::sync::Arc<Domain>> {
    fields.remove("submit");
    let domain = named_domain(server, fields);
    fields.remove(DOMAIN_NAME_FIELD);
    domain
}

fn update_blacklist(blacklist: &Blacklist, fields: &mut FormFields) {
    fields.remove("submit");
    let Some((address, action)) = fields.pop_first() else {
        tracing::error!("Missing address and action");
        return;
    };
    blacklist.update(&address, Action::from_wire(&action));
}

fn add_to_blacklist(blacklist: &Blacklist, fields: &mut FormFields) {
    fields.remove("submit");
    let Some(address) = fields.get("newEntry").map(str::trim) else {
        return;
    };
    if !is_valid_address(address) {
        tracing::error!(address = %address, "Not an IP address, not blacklisted");
        return;
    }
    let Some(action) = fields.get("action") else {
        return;
    };
    blacklist.add(address, Action::from_wire(action));
}

fn remove_from_blacklist(blacklist: &Blacklist, fields: &mut FormFields) {
    fields.remove("submit");
    if let Some((address, _)) = fields.pop_first() {
        blacklist.remove(&address);
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn update_domain(server: &ServerContext, fields: &mut FormFields) {
    let Some(domain) = named_domain(server, fields) else {
        return;
    };
    fields.remove(DOMAIN_NAME_FIELD);
    fields.remove("submit");
    if fields.len() != 1 {
        tracing::error!(fields = fields.len(), "UpdateDomain expects exactly one key/value pair");
        return;
    }
    let Some((key, value)) = fields.pop_first() else {
        return;
    };

    match key.as_str() {
        "name" => {
            if let Err(e) = server.domains().rename(&domain.name(), &value) {
                tracing::error!(error = %e, "Domain not renamed");
            }
        }
        "wwwincluded" => {
            if let Some(flag) = parse_flag(&value) {
                domain.update(|s| s.www_included = flag);
            }
        }
        "enabled" => {
            if let Some(flag) = parse_flag(&value) {
                domain.update(|s| s.enabled = flag);
            }
        }
        "404logenabled" => {
            if let Some(flag) = parse_flag(&value) {
                domain.update(|s| s.four04_log_enabled = flag);
            }
        }
        "root" => domain.update(|s| s.root = PathBuf::from(value.trim())),
        "sessiontimeout" => match value.trim().parse::<u64>() {
            Ok(secs) => domain.update(|s| s.session_timeout_secs = secs),
            Err(_) => tracing::error!(value = %value, "Invalid session timeout"),
        },
        "certificatedir" => {
            let dir = value.trim();
            domain.update(|s| s.certificate_dir = (!dir.is_empty()).then(|| PathBuf::from(dir)));
        }
        other => tracing::error!(key = %other, value = %value, "Unknown domain setting"),
    }
}

fn update_domain_services(server: &ServerContext, fields: &FormFields) {
    let Some(domain) = named_domain(server, fields) else {
        return;
    };

    let mut selected: Vec<(i64, String)> = Vec::new();
    let mut index = 0;
    while let Some(sequence) = fields.get(&format!("seqName{}", index)) {
        if fields.get(&format!("usedName{}", index)).is_some() {
            match (sequence.trim().parse::<i64>(), fields.get(&format!("nameName{}", index))) {
                (Ok(sequence), Some(name)) => selected.push((sequence, name.to_string())),
                (Err(_), _) => tracing::error!(index, "Invalid service sequence number"),
                (_, None) => tracing::error!(index, "Missing service name"),
            }
        }
        index += 1;
    }
    selected.sort_by_key(|(sequence, _)| *sequence);

    let names: Vec<String> = selected.into_iter().map(|(_, name)| name).collect();
    domain.update(|s| s.services = names);
    domain.rebuild_pipeline(server.services());
}

fn delete_domain(server: &ServerContext, fields: &FormFields) {
    let Some(name) = fields.get(DOMAIN_NAME_FIELD) else {
        tracing::error!("Missing domain name");
        return;
    };
    match server.domains().remove(name) {
        Some(_) => tracing::info!(domain = %name, "Domain deleted"),
        None => tracing::error!(domain = %name, "Domain does not exist"),
    }
}

fn create_domain(server: &ServerContext, fields: &FormFields) {
    let Some(name) = fields.get(DOMAIN_NAME_FIELD).map(|n| n.trim().to_lowercase()) else {
        tracing::error!("Missing domain name");
        return;
    };
    if server.domains().get(&name).is_some() {
        tracing::error!(domain = %name, "Domain already exists");
        return;
    }

    let root = server.new_domain_root(&name);
    if let Err(e) = std::fs::create_dir_all(&root) {
        tracing::warn!(domain = %name, root = %root.display(), error = %e, "Cannot create domain root");
    }
    let domain = server.build_domain(&DomainConfig {
        name: name.clone(),
        root,
        ..DomainConfig::default()
    });
    match server.domains().add(domain) {
        Ok(()) => tracing::info!(domain = %name, "Domain created"),
        Err(e) => tracing::error!(error = %e, "Domain not created"),
    }
}
