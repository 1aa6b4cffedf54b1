use chrono::Utc;

use super::crd::v1::port::{ConditionStatus, PortCondition, PortConditionType, PortStatus};

pub const REASON_CREATED: &str = "ProviderPortCreated";
pub const REASON_CREATE_FAILED: &str = "ProviderPortCreateFailed";

impl PortStatus {
    pub fn get_condition(&self, type_: PortConditionType) -> Option<&PortCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_condition_true(&self, type_: PortConditionType) -> bool {
        self.get_condition(type_)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Updates or inserts a condition. Transition time only moves when the
    /// status flips, an identical condition is left untouched.
    pub fn set_condition(
        &mut self,
        type_: PortConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now();

        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(condition) => {
                if condition.status == status
                    && condition.reason.as_deref() == Some(reason)
                    && condition.message.as_deref() == Some(message)
                {
                    return;
                }

                if condition.status != status {
                    condition.last_transition_time = Some(now);
                }

                condition.last_update_time = Some(now);
                condition.status = status;
                condition.reason = Some(reason.to_owned());
                condition.message = Some(message.to_owned());
            }
            None => self.conditions.push(PortCondition {
                type_,
                status,
                reason: Some(reason.to_owned()),
                message: Some(message.to_owned()),
                last_update_time: Some(now),
                last_transition_time: Some(now),
            }),
        }
    }

    pub fn remove_condition(&mut self, type_: PortConditionType) {
        self.conditions.retain(|c| c.type_ != type_);
    }

    pub fn set_error(&mut self, reason: &str, message: &str) {
        self.set_condition(PortConditionType::Error, ConditionStatus::True, reason, message);
    }

    pub fn set_created(&mut self, message: &str) {
        self.remove_condition(PortConditionType::Error);
        self.set_condition(
            PortConditionType::Created,
            ConditionStatus::True,
            REASON_CREATED,
            message,
        );
        self.set_condition(
            PortConditionType::Ready,
            ConditionStatus::True,
            REASON_CREATED,
            message,
        );
    }
}
