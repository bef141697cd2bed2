//! Required-field checks run before any network call.
//!
//! These mirror the panel's form checks only; the backend remains the
//! authority on everything else.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{Broker, Client, CopySetup, Group};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("multiplier must be positive (got {0})")]
    NonPositiveMultiplier(Decimal),
    #[error("select at least one {0}")]
    EmptySelection(&'static str),
    #[error("master client {0} cannot also be a child")]
    MasterIsChild(String),
    #[error("{0} clients need an access token")]
    MissingAccessToken(Broker),
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Missing(field));
    }
    Ok(())
}

fn require_positive(multiplier: Decimal) -> Result<(), ValidationError> {
    if multiplier <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveMultiplier(multiplier));
    }
    Ok(())
}

pub fn group(g: &Group) -> Result<(), ValidationError> {
    require(&g.name, "group name")?;
    require_positive(g.multiplier)?;
    if g.members.is_empty() {
        return Err(ValidationError::EmptySelection("client"));
    }
    Ok(())
}

pub fn copy_setup(s: &CopySetup) -> Result<(), ValidationError> {
    require(&s.name, "setup name")?;
    require(&s.master, "master client")?;
    if s.children.is_empty() {
        return Err(ValidationError::EmptySelection("child client"));
    }
    if s.children.iter().any(|c| c == &s.master) {
        return Err(ValidationError::MasterIsChild(s.master.clone()));
    }
    for m in s.multipliers.values() {
        require_positive(*m)?;
    }
    Ok(())
}

pub fn client(c: &Client) -> Result<(), ValidationError> {
    require(&c.userid, "user id")?;
    // Dhan logs in with a pre-issued access token; the api key field doubles
    // as one in older forms.
    if c.broker == Broker::Dhan
        && c.credential("access_token").is_none()
        && c.credential("apikey").is_none()
    {
        return Err(ValidationError::MissingAccessToken(c.broker.clone()));
    }
    Ok(())
}

pub fn login(user_id: &str, password: &str) -> Result<(), ValidationError> {
    require(user_id, "user id")?;
    require(password, "password")
}

pub fn registration(name: &str, email: &str, password: &str) -> Result<(), ValidationError> {
    require(name, "name")?;
    require(email, "email")?;
    require(password, "password")?;
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ValidationError::InvalidEmail(email.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_rules() {
        let ok = Group::new("Scalpers", Decimal::ONE, vec!["U1".into()]);
        assert!(group(&ok).is_ok());

        let mut blank = ok.clone();
        blank.name = "   ".into();
        assert_eq!(group(&blank), Err(ValidationError::Missing("group name")));

        let mut zero = ok.clone();
        zero.multiplier = Decimal::ZERO;
        assert!(matches!(group(&zero), Err(ValidationError::NonPositiveMultiplier(_))));

        let empty = Group::new("Empty", Decimal::ONE, vec![]);
        assert_eq!(group(&empty), Err(ValidationError::EmptySelection("client")));
    }

    #[test]
    fn test_copy_setup_rules() {
        let ok = CopySetup::new("Mirror", "U1", vec!["U2".into()]);
        assert!(copy_setup(&ok).is_ok());

        let selfish = CopySetup::new("Loop", "U1", vec!["U1".into()]);
        assert_eq!(
            copy_setup(&selfish),
            Err(ValidationError::MasterIsChild("U1".into()))
        );

        let orphan = CopySetup::new("Orphan", "U1", vec![]);
        assert!(matches!(copy_setup(&orphan), Err(ValidationError::EmptySelection(_))));

        let mut negative = ok.clone();
        negative.multipliers.insert("U2".into(), Decimal::from(-1));
        assert!(matches!(
            copy_setup(&negative),
            Err(ValidationError::NonPositiveMultiplier(_))
        ));
    }

    #[test]
    fn test_client_rules() {
        let bare = Client::new(Broker::Dhan, "U1");
        assert!(matches!(client(&bare), Err(ValidationError::MissingAccessToken(_))));

        let dhan = Client::new(Broker::Dhan, "U1").with_credential("access_token", "t");
        assert!(client(&dhan).is_ok());

        let legacy = Client::new(Broker::Dhan, "U1").with_credential("apikey", "k");
        assert!(client(&legacy).is_ok());

        let motilal = Client::new(Broker::Motilal, "M1");
        assert!(client(&motilal).is_ok());

        let anonymous = Client::new(Broker::Motilal, "");
        assert_eq!(client(&anonymous), Err(ValidationError::Missing("user id")));
    }

    #[test]
    fn test_registration_rules() {
        assert!(registration("Ravi", "ravi@example.com", "pw").is_ok());
        assert_eq!(
            registration("Ravi", "ravi.example.com", "pw"),
            Err(ValidationError::InvalidEmail("ravi.example.com".into()))
        );
        assert_eq!(registration("", "a@b", "pw"), Err(ValidationError::Missing("name")));
        assert!(login("U1", "").is_err());
    }
}
