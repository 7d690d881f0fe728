//! Workflow templates: versioned, ordered approval chains
//!
//! A template is immutable once stored. Registering a template under an
//! existing (company, name) produces the next version; live requests keep
//! pointing at the version they were created from.

use crate::action::ActionOutcome;
use crate::errors::{ValidationError, ValidationResult};
use crate::{Amount, CompanyId, TemplateId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Timeout Policy ───────────────────────────────────────────────────

/// What the escalation engine does once an action's SLA has elapsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    #[default]
    None,
    Escalate,
    Approve,
    Reject,
}

// ── Approver Resolution ──────────────────────────────────────────────

/// A concrete approver reference inside an amount band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverRef {
    User { user_id: UserId },
    Role { role: String },
}

/// One band of an amount-banded rule. `max_amount` is inclusive; `None`
/// leaves the band open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountBand {
    pub min_amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Amount>,
    pub approver: ApproverRef,
}

impl AmountBand {
    pub fn new(min_amount: Amount, max_amount: Option<Amount>, approver: ApproverRef) -> Self {
        Self {
            min_amount,
            max_amount,
            approver,
        }
    }

    pub fn contains(&self, amount: Amount) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }
}

/// How the approver of a level is found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ApproverRule {
    /// A fixed user
    User { user_id: UserId },
    /// Any member of a directory role
    Role { role: String },
    /// Picked by the request amount
    AmountBand { bands: Vec<AmountBand> },
}

impl ApproverRule {
    fn validate(&self, level: u32) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidLevel {
            level,
            reason: reason.to_string(),
        };

        match self {
            ApproverRule::User { .. } => Ok(()),
            ApproverRule::Role { role } if role.trim().is_empty() => Err(invalid("empty role")),
            ApproverRule::Role { .. } => Ok(()),
            ApproverRule::AmountBand { bands } => {
                if bands.is_empty() {
                    return Err(invalid("amount band rule has no bands"));
                }
                let mut sorted: Vec<&AmountBand> = bands.iter().collect();
                sorted.sort_by_key(|b| b.min_amount);

                for (i, band) in sorted.iter().enumerate() {
                    if band.min_amount < 0 {
                        return Err(invalid("band minimum is negative"));
                    }
                    if let ApproverRef::Role { role } = &band.approver {
                        if role.trim().is_empty() {
                            return Err(invalid("band has an empty role"));
                        }
                    }
                    match (band.max_amount, sorted.get(i + 1)) {
                        (Some(max), _) if max < band.min_amount => {
                            return Err(invalid("band maximum is below its minimum"));
                        }
                        (Some(max), Some(next)) if max >= next.min_amount => {
                            return Err(invalid("amount bands overlap"));
                        }
                        (None, Some(_)) => {
                            return Err(invalid("open-ended band must be the highest"));
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

/// Longest due window a level, template or engine default may ask for
pub const MAX_SLA_HOURS: u32 = 24 * 366 * 10;

// ── Levels ───────────────────────────────────────────────────────────

/// One step of an approval chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLevel {
    /// 1-based position in the chain
    pub level_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub approver: ApproverRule,
    /// Hours the approver has to act; 0 falls back to the template's
    /// `escalation_hours`
    #[serde(default)]
    pub sla_hours: u32,
}

impl WorkflowLevel {
    pub fn new(level_order: u32, approver: ApproverRule, sla_hours: u32) -> Self {
        Self {
            level_order,
            name: None,
            approver,
            sla_hours,
        }
    }

    pub fn user(level_order: u32, user_id: UserId, sla_hours: u32) -> Self {
        Self::new(level_order, ApproverRule::User { user_id }, sla_hours)
    }

    pub fn role(level_order: u32, role: impl Into<String>, sla_hours: u32) -> Self {
        Self::new(
            level_order,
            ApproverRule::Role { role: role.into() },
            sla_hours,
        )
    }

    pub fn amount_banded(level_order: u32, bands: Vec<AmountBand>, sla_hours: u32) -> Self {
        Self::new(level_order, ApproverRule::AmountBand { bands }, sla_hours)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ── Template ─────────────────────────────────────────────────────────

/// A stored, immutable version of an approval chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub company_id: CompanyId,
    pub name: String,
    /// 1-based, one sequence per (company, name)
    pub version: u32,
    pub entity_type: String,
    pub levels: Vec<WorkflowLevel>,
    pub auto_escalate: bool,
    pub escalation_hours: u32,
    pub max_escalations: u32,
    pub auto_action_on_timeout: TimeoutAction,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
}

impl WorkflowTemplate {
    pub fn level(&self, level_order: u32) -> Option<&WorkflowLevel> {
        self.levels.iter().find(|l| l.level_order == level_order)
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Whether an overdue action should be pushed to the next level
    pub fn escalates_on_timeout(&self) -> bool {
        self.auto_escalate || self.auto_action_on_timeout == TimeoutAction::Escalate
    }

    /// Outcome forced on a breached request, if the template resolves them
    pub fn timeout_resolution(&self) -> Option<ActionOutcome> {
        match self.auto_action_on_timeout {
            TimeoutAction::Approve => Some(ActionOutcome::Approve),
            TimeoutAction::Reject => Some(ActionOutcome::Reject),
            TimeoutAction::None | TimeoutAction::Escalate => None,
        }
    }

    /// SLA window for a level, or `None` when the level is not part of the
    /// chain
    pub fn sla_hours_for(&self, level_order: u32) -> Option<u32> {
        self.level(level_order).map(|level| {
            if level.sla_hours > 0 {
                level.sla_hours
            } else {
                self.escalation_hours
            }
        })
    }

    /// No further timeout escalation is possible for a request sitting at
    /// `current_level` that has already been escalated `escalation_count`
    /// times.
    pub fn escalation_exhausted(&self, current_level: u32, escalation_count: u32) -> bool {
        escalation_count >= self.max_escalations || self.level(current_level + 1).is_none()
    }
}

// ── Registration Input ───────────────────────────────────────────────

/// Input for registering a new template version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub company_id: CompanyId,
    pub name: String,
    pub entity_type: String,
    pub levels: Vec<WorkflowLevel>,
    #[serde(default)]
    pub auto_escalate: bool,
    #[serde(default = "default_escalation_hours")]
    pub escalation_hours: u32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
    #[serde(default)]
    pub auto_action_on_timeout: TimeoutAction,
}

fn default_escalation_hours() -> u32 {
    24
}

fn default_max_escalations() -> u32 {
    3
}

impl NewTemplate {
    pub fn new(
        company_id: CompanyId,
        name: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            company_id,
            name: name.into(),
            entity_type: entity_type.into(),
            levels: Vec::new(),
            auto_escalate: false,
            escalation_hours: default_escalation_hours(),
            max_escalations: default_max_escalations(),
            auto_action_on_timeout: TimeoutAction::None,
        }
    }

    pub fn with_level(mut self, level: WorkflowLevel) -> Self {
        self.levels.push(level);
        self
    }

    pub fn with_auto_escalate(mut self, auto_escalate: bool) -> Self {
        self.auto_escalate = auto_escalate;
        self
    }

    pub fn with_escalation_hours(mut self, hours: u32) -> Self {
        self.escalation_hours = hours;
        self
    }

    pub fn with_max_escalations(mut self, max: u32) -> Self {
        self.max_escalations = max;
        self
    }

    pub fn with_timeout_action(mut self, action: TimeoutAction) -> Self {
        self.auto_action_on_timeout = action;
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.entity_type.trim().is_empty() {
            return Err(ValidationError::MissingField("entity_type"));
        }
        if self.levels.is_empty() {
            return Err(ValidationError::NoLevels);
        }
        if self.escalation_hours > MAX_SLA_HOURS {
            return Err(ValidationError::HoursOutOfRange {
                field: "escalation_hours",
                hours: self.escalation_hours,
                max: MAX_SLA_HOURS,
            });
        }

        for (index, level) in self.levels.iter().enumerate() {
            let expected = index as u32 + 1;
            if level.level_order != expected {
                return Err(ValidationError::NonContiguousLevels {
                    expected,
                    found: level.level_order,
                });
            }
            if level.sla_hours == 0 && self.escalation_hours == 0 {
                return Err(ValidationError::InvalidLevel {
                    level: expected,
                    reason: "no SLA and no template escalation_hours".to_string(),
                });
            }
            if level.sla_hours > MAX_SLA_HOURS {
                return Err(ValidationError::InvalidLevel {
                    level: expected,
                    reason: format!("sla_hours {} exceeds {MAX_SLA_HOURS}", level.sla_hours),
                });
            }
            level.approver.validate(expected)?;
        }
        Ok(())
    }

    /// Freeze into a stored template with the given version
    pub fn into_template(
        self,
        version: u32,
        created_by: Option<UserId>,
        created_at: DateTime<Utc>,
    ) -> WorkflowTemplate {
        WorkflowTemplate {
            id: TemplateId::generate(),
            company_id: self.company_id,
            name: self.name,
            version,
            entity_type: self.entity_type,
            levels: self.levels,
            auto_escalate: self.auto_escalate,
            escalation_hours: self.escalation_hours,
            max_escalations: self.max_escalations,
            auto_action_on_timeout: self.auto_action_on_timeout,
            created_at,
            created_by,
        }
    }
}
