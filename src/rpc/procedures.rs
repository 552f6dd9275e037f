//! Procedure catalog.
//!
//! Pure data: each logical operation maps to one hierarchical procedure
//! string and a deterministic argument payload. No behavior lives here.

use serde_json::{Map, Value};

/// Logical operations exposed over the realtime session.
#[derive(Debug, Clone, PartialEq)]
pub enum Procedure {
    /// Session connectivity notifications topic
    SessionStateChange,

    /// Operator configuration
    GetOperatorInfo,

    /// Account profile of the logged-in player
    GetProfile,

    /// Wallet balances of the logged-in player
    GetBalances,

    /// Apply a bonus code to the account
    ApplyBonus { code: String },

    /// Set a responsible-gaming limit
    SetLimit { limit_type: String, amount: f64 },

    /// Resolve the launch URL for a game, by slug or by table id
    GetLaunchUrl {
        slug: Option<String>,
        table_id: Option<String>,
        partner_id: Option<String>,
    },

    /// Accept the current terms and conditions
    AcceptTerms,

    /// End the player session
    Logout,
}

impl Procedure {
    /// The wire procedure string
    pub fn uri(&self) -> String {
        match self {
            Procedure::SessionStateChange => "/sessionStateChange".to_string(),
            Procedure::GetOperatorInfo => "/sports#operatorInfo".to_string(),
            Procedure::GetProfile => "/user/account#getProfile".to_string(),
            Procedure::GetBalances => "/user/account#getBalances".to_string(),
            Procedure::ApplyBonus { .. } => "/user/bonus#apply".to_string(),
            Procedure::SetLimit { .. } => "/user/limits#set".to_string(),
            Procedure::GetLaunchUrl { .. } => "/casino#getLaunchUrl".to_string(),
            Procedure::AcceptTerms => "/user/account#acceptTermsAndConditions".to_string(),
            Procedure::Logout => "/user#logout".to_string(),
        }
    }

    /// Positional arguments; the catalog carries everything keyed
    pub fn args(&self) -> Option<Vec<Value>> {
        None
    }

    /// Keyed arguments
    pub fn kwargs(&self) -> Option<Map<String, Value>> {
        match self {
            Procedure::ApplyBonus { code } => {
                let mut kwargs = Map::new();
                kwargs.insert("bonusCode".to_string(), Value::String(code.clone()));
                Some(kwargs)
            }

            Procedure::SetLimit { limit_type, amount } => {
                let mut kwargs = Map::new();
                kwargs.insert("type".to_string(), Value::String(limit_type.clone()));
                kwargs.insert("amount".to_string(), Value::from(*amount));
                Some(kwargs)
            }

            // The slug form wins whenever a slug is present; the table-id
            // form is only used without one.
            Procedure::GetLaunchUrl { slug, table_id, partner_id } => {
                let mut kwargs = Map::new();
                if let Some(slug) = slug {
                    kwargs.insert("slug".to_string(), Value::String(slug.clone()));
                } else if let Some(table_id) = table_id {
                    kwargs.insert("tableId".to_string(), Value::String(table_id.clone()));
                } else {
                    return None;
                }
                if let Some(partner_id) = partner_id {
                    kwargs.insert("partnerId".to_string(), Value::String(partner_id.clone()));
                }
                Some(kwargs)
            }

            _ => None,
        }
    }
}
