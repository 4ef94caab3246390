use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::definition::SagaState;
use super::errors::ActivityError;
use crate::pipeline::{StepDefinition, StepStatus};
use crate::store::{OutboxEntry, SagaFailure, SagaRecord};

/// One workflow run
#[derive(Debug, Clone, PartialEq)]
pub struct SagaInstance<S, P> {
    pub correlation_id: Uuid,
    pub state: S,
    /// 0 until the first save
    pub version: i64,
    pub ordered_steps: Vec<StepDefinition>,
    /// Index of the next step to run; -1 before steps are loaded, equal to
    /// the step count once every step has completed
    pub current_step_index: i32,
    pub payload: P,
    pub failure: Option<SagaFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: SagaState, P: Default> SagaInstance<S, P> {
    pub fn new(correlation_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            state: S::initial(),
            version: 0,
            ordered_steps: Vec::new(),
            current_step_index: -1,
            payload: P::default(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<S: SagaState, P> SagaInstance<S, P> {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn step_count(&self) -> i32 {
        self.ordered_steps.len() as i32
    }

    /// Store the resolved steps and point at the first one
    ///
    /// The step list is immutable once loaded.
    pub fn load_steps(&mut self, steps: Vec<StepDefinition>) -> Result<(), ActivityError> {
        if !self.ordered_steps.is_empty() {
            return Err(ActivityError::invalid_state(format!(
                "steps already loaded for {}",
                self.correlation_id
            )));
        }
        let mut steps = steps;
        steps.sort_by_key(|s| s.order);
        self.ordered_steps = steps;
        self.current_step_index = 0;
        Ok(())
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        usize::try_from(self.current_step_index)
            .ok()
            .and_then(|i| self.ordered_steps.get(i))
    }

    pub fn has_current_step(&self) -> bool {
        self.current_step().is_some()
    }

    pub fn set_current_step_status(&mut self, status: StepStatus) -> Result<(), ActivityError> {
        let index = usize::try_from(self.current_step_index)
            .map_err(|_| ActivityError::invalid_state("no step is current"))?;
        let step = self
            .ordered_steps
            .get_mut(index)
            .ok_or_else(|| ActivityError::invalid_state(format!("step {index} out of range")))?;
        step.status = status;
        Ok(())
    }

    /// Move to the next step; never past the step count
    pub fn advance(&mut self) {
        if self.current_step_index < self.step_count() {
            self.current_step_index += 1;
        }
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failure = Some(SagaFailure {
            stage: self.state.as_str().to_string(),
            reason: reason.into(),
            at: Utc::now(),
        });
    }
}

impl<S: SagaState, P: Serialize + DeserializeOwned> SagaInstance<S, P> {
    pub fn to_record(
        &self,
        saga_type: &str,
        outbox: Vec<OutboxEntry>,
    ) -> Result<SagaRecord, serde_json::Error> {
        Ok(SagaRecord {
            saga_type: saga_type.to_string(),
            correlation_id: self.correlation_id,
            current_state: self.state.as_str().to_string(),
            version: self.version,
            current_step_index: self.current_step_index,
            ordered_steps: self.ordered_steps.clone(),
            payload: serde_json::to_value(&self.payload)?,
            failure: self.failure.clone(),
            outbox,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Rebuild an instance; fails on an unknown state name or a payload that no longer parses
    pub fn from_record(record: &SagaRecord) -> Result<Self, String> {
        let state = S::from_name(&record.current_state)
            .ok_or_else(|| format!("unknown state '{}'", record.current_state))?;
        let payload = serde_json::from_value(record.payload.clone())
            .map_err(|e| format!("payload does not parse: {e}"))?;

        Ok(Self {
            correlation_id: record.correlation_id,
            state,
            version: record.version,
            ordered_steps: record.ordered_steps.clone(),
            current_step_index: record.current_step_index,
            payload,
            failure: record.failure.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Phase {
        Start,
        Running,
        Done,
    }

    impl SagaState for Phase {
        fn initial() -> Self {
            Self::Start
        }
        fn is_terminal(&self) -> bool {
            matches!(self, Self::Done)
        }
        fn as_str(&self) -> &'static str {
            match self {
                Self::Start => "start",
                Self::Running => "running",
                Self::Done => "done",
            }
        }
        fn from_name(name: &str) -> Option<Self> {
            match name {
                "start" => Some(Self::Start),
                "running" => Some(Self::Running),
                "done" => Some(Self::Done),
                _ => None,
            }
        }
    }

    type Instance = SagaInstance<Phase, serde_json::Value>;

    #[test]
    fn test_new_instance_starts_before_first_step() {
        let instance = Instance::new(Uuid::new_v4());
        assert_eq!(instance.state, Phase::Start);
        assert_eq!(instance.version, 0);
        assert_eq!(instance.current_step_index, -1);
        assert!(instance.current_step().is_none());
    }

    #[test]
    fn test_load_steps_sorts_and_refuses_overwrite() {
        let mut instance = Instance::new(Uuid::new_v4());
        instance
            .load_steps(vec![
                StepDefinition::new(2, "b"),
                StepDefinition::new(1, "a"),
            ])
            .unwrap();
        assert_eq!(instance.current_step_index, 0);
        assert_eq!(instance.current_step().unwrap().execution_type.as_str(), "a");

        assert!(instance.load_steps(vec![StepDefinition::new(1, "c")]).is_err());
    }

    #[test]
    fn test_advance_is_capped_at_step_count() {
        let mut instance = Instance::new(Uuid::new_v4());
        instance.load_steps(vec![StepDefinition::new(1, "a")]).unwrap();
        instance.advance();
        instance.advance();
        assert_eq!(instance.current_step_index, 1);
        assert!(!instance.has_current_step());
    }

    #[test]
    fn test_record_round_trip_keeps_failure_stage() {
        let mut instance = Instance::new(Uuid::new_v4());
        instance.state = Phase::Running;
        instance.record_failure("step exploded");
        instance.version = 3;

        let record = instance.to_record("test", Vec::new()).unwrap();
        assert_eq!(record.current_state, "running");

        let restored = Instance::from_record(&record).unwrap();
        assert_eq!(restored, instance);
        assert_eq!(restored.failure.unwrap().stage, "running");
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let mut record = Instance::new(Uuid::new_v4())
            .to_record("test", Vec::new())
            .unwrap();
        record.current_state = "vanished".to_string();
        assert!(Instance::from_record(&record).is_err());
    }
}
