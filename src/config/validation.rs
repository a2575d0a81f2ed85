//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Value ranges (pool capacity, distinct ports)
//! - Domain names present and unique
//! - Blacklist entries are IP addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&ServerConfig → Result<(), Vec<ValidationError>>`

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;

use crate::config::schema::ServerConfig;
use crate::security::Action;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    ZeroConnections,
    SamePorts(u16),
    EmptyDomainName(usize),
    DuplicateDomain(String),
    InvalidBlacklistAddress { scope: String, address: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroConnections => {
                write!(f, "max_accepted_connections must be at least 1")
            }
            ValidationError::SamePorts(port) => {
                write!(f, "http_port and https_port are both {}", port)
            }
            ValidationError::EmptyDomainName(index) => {
                write!(f, "domain #{} has no name", index)
            }
            ValidationError::DuplicateDomain(name) => write!(f, "domain {} is defined twice", name),
            ValidationError::InvalidBlacklistAddress { scope, address } => {
                write!(f, "blacklist entry {:?} in {} is not an IP address", address, scope)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// True when `address` is a literal IPv4 or IPv6 address.
pub fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
}

fn check_blacklist(scope: &str, entries: &BTreeMap<String, Action>, errors: &mut Vec<ValidationError>) {
    for address in entries.keys() {
        if !is_valid_address(address) {
            errors.push(ValidationError::InvalidBlacklistAddress {
                scope: scope.to_string(),
                address: address.clone(),
            });
        }
    }
}

/// Check a configuration before it is accepted.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let params = &config.parameters;

    if params.max_accepted_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }
    if params.http_port != 0 && params.http_port == params.https_port {
        errors.push(ValidationError::SamePorts(params.http_port));
    }

    check_blacklist("server", &config.blacklist, &mut errors);

    let mut seen = HashSet::new();
    for (index, domain) in config.domains.iter().enumerate() {
        if domain.name.trim().is_empty() {
            errors.push(ValidationError::EmptyDomainName(index));
            continue;
        }
        if !seen.insert(domain.name.to_lowercase()) {
            errors.push(ValidationError::DuplicateDomain(domain.name.clone()));
        }
        check_blacklist(&domain.name, &domain.blacklist, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
