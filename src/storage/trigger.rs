//! Row-level triggers.
//!
//! Hosts implement [`Trigger`] and register it against a table, a timing and
//! an operation. Registered triggers fire synchronously, in registration
//! order, inline with the mutation that caused them. A failing trigger aborts
//! that mutation's statement.

use std::{
    fmt::Display,
    sync::{Arc, Mutex},
};

use tracing::{trace, warn};

use crate::{
    error::{Error, Result},
    storage::row::Row,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOperation {
    Insert,
    Update,
    Delete,
    Select,
}

impl Display for TriggerOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TriggerOperation::Insert => "INSERT",
            TriggerOperation::Update => "UPDATE",
            TriggerOperation::Delete => "DELETE",
            TriggerOperation::Select => "SELECT",
        })
    }
}

/// What a trigger is bound to
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDefinition {
    pub schema: String,
    pub name: String,
    pub table: String,
    pub timing: TriggerTiming,
    pub operation: TriggerOperation,
}

impl TriggerDefinition {
    fn matches(&self, schema: &str, table: &str, timing: TriggerTiming, op: TriggerOperation) -> bool {
        self.schema == schema && self.table == table && self.timing == timing && self.operation == op
    }
}

/// A trigger callback
///
/// `fire` receives the row before and after the change: INSERT passes only
/// the new row, DELETE only the old one, UPDATE both, and SELECT neither.
pub trait Trigger: Send {
    /// Called once at registration
    fn init(&mut self, _definition: &TriggerDefinition) -> Result<()> {
        Ok(())
    }

    fn fire(&mut self, old: Option<&Row>, new: Option<&Row>) -> Result<()>;

    /// Called when the registry releases the trigger
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the trigger is dropped from its table
    fn remove(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Registration {
    definition: TriggerDefinition,
    trigger: Arc<Mutex<Box<dyn Trigger>>>,
}

/// Registered triggers in registration order
#[derive(Default)]
pub struct TriggerRegistry {
    registrations: Mutex<Vec<Registration>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes and registers a trigger. Names are unique per table.
    pub fn register(&self, definition: TriggerDefinition, mut trigger: Box<dyn Trigger>) -> Result<()> {
        let mut registrations = self.registrations.lock()?;
        if registrations.iter().any(|r| {
            r.definition.schema == definition.schema
                && r.definition.table == definition.table
                && r.definition.name == definition.name
        }) {
            return Err(Error::Execution(format!(
                "trigger \"{}\" for relation \"{}\" already exists",
                definition.name, definition.table
            )));
        }
        trigger.init(&definition).map_err(Self::trigger_error(&definition))?;
        trace!(trigger = %definition.name, table = %definition.table, "registered trigger");
        registrations.push(Registration {
            definition,
            trigger: Arc::new(Mutex::new(trigger)),
        });
        Ok(())
    }

    /// Removes a trigger, calling `remove` then `close` on it
    pub fn unregister(&self, schema: &str, table: &str, name: &str) -> Result<()> {
        let registration = {
            let mut registrations = self.registrations.lock()?;
            let index = registrations
                .iter()
                .position(|r| {
                    r.definition.schema == schema
                        && r.definition.table == table
                        && r.definition.name == name
                })
                .ok_or_else(|| {
                    Error::Execution(format!(
                        "trigger \"{}\" for table \"{}\" does not exist",
                        name, table
                    ))
                })?;
            registrations.remove(index)
        };
        let mut trigger = registration.trigger.lock()?;
        trigger
            .remove()
            .and_then(|_| trigger.close())
            .map_err(Self::trigger_error(&registration.definition))
    }

    /// Drops every trigger of a dropped table
    pub fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let names: Vec<String> = self
            .registrations
            .lock()?
            .iter()
            .filter(|r| r.definition.schema == schema && r.definition.table == table)
            .map(|r| r.definition.name.clone())
            .collect();
        for name in names {
            self.unregister(schema, table, &name)?;
        }
        Ok(())
    }

    /// Fires the matching triggers in registration order. The registry lock
    /// is released before any callback runs.
    pub fn fire(
        &self,
        schema: &str,
        table: &str,
        timing: TriggerTiming,
        operation: TriggerOperation,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<()> {
        let matching: Vec<(TriggerDefinition, Arc<Mutex<Box<dyn Trigger>>>)> = self
            .registrations
            .lock()?
            .iter()
            .filter(|r| r.definition.matches(schema, table, timing, operation))
            .map(|r| (r.definition.clone(), r.trigger.clone()))
            .collect();

        for (definition, trigger) in matching {
            trace!(
                trigger = %definition.name,
                table,
                ?timing,
                %operation,
                old_id = old.map(|r| r.id),
                new_id = new.map(|r| r.id),
                "firing trigger"
            );
            trigger
                .lock()?
                .fire(old, new)
                .map_err(Self::trigger_error(&definition))?;
        }
        Ok(())
    }

    fn trigger_error(definition: &TriggerDefinition) -> impl Fn(Error) -> Error + '_ {
        move |err| match err {
            Error::Trigger(msg) => Error::Trigger(msg),
            err => Error::Trigger(format!("trigger \"{}\" failed: {}", definition.name, err)),
        }
    }
}

impl Drop for TriggerRegistry {
    fn drop(&mut self) {
        let Ok(registrations) = self.registrations.get_mut() else {
            return;
        };
        for registration in registrations.drain(..) {
            let closed = match registration.trigger.lock() {
                Ok(mut trigger) => trigger.close(),
                Err(err) => Err(err.into()),
            };
            if let Err(err) = closed {
                warn!(trigger = %registration.definition.name, %err, "closing trigger failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Trigger, TriggerDefinition, TriggerOperation, TriggerRegistry, TriggerTiming};
    use crate::{
        error::{Error, Result},
        storage::row::Row,
    };

    /// Records every call into a collector owned by the test
    struct Recorder {
        label: &'static str,
        events: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Trigger for Recorder {
        fn init(&mut self, definition: &TriggerDefinition) -> Result<()> {
            self.events
                .lock()?
                .push(format!("{}:init:{}", self.label, definition.table));
            Ok(())
        }

        fn fire(&mut self, old: Option<&Row>, new: Option<&Row>) -> Result<()> {
            self.events.lock()?.push(format!(
                "{}:fire:{:?}:{:?}",
                self.label,
                old.map(|r| r.id),
                new.map(|r| r.id)
            ));
            if self.fail {
                return Err(Error::Execution("refused".into()));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.events.lock()?.push(format!("{}:close", self.label));
            Ok(())
        }

        fn remove(&mut self) -> Result<()> {
            self.events.lock()?.push(format!("{}:remove", self.label));
            Ok(())
        }
    }

    fn definition(name: &str, timing: TriggerTiming) -> TriggerDefinition {
        TriggerDefinition {
            schema: "public".into(),
            name: name.into(),
            table: "t".into(),
            timing,
            operation: TriggerOperation::Insert,
        }
    }

    #[test]
    fn test_fire_in_registration_order() -> Result<()> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let registry = TriggerRegistry::new();
        for label in ["first", "second"] {
            registry.register(
                definition(label, TriggerTiming::Before),
                Box::new(Recorder {
                    label,
                    events: events.clone(),
                    fail: false,
                }),
            )?;
        }
        let row = Row::new(1, vec![]);
        registry.fire(
            "public",
            "t",
            TriggerTiming::Before,
            TriggerOperation::Insert,
            None,
            Some(&row),
        )?;
        // Non-matching timing fires nothing
        registry.fire(
            "public",
            "t",
            TriggerTiming::After,
            TriggerOperation::Insert,
            None,
            Some(&row),
        )?;
        assert_eq!(
            *events.lock()?,
            vec![
                "first:init:t",
                "second:init:t",
                "first:fire:None:Some(1)",
                "second:fire:None:Some(1)",
            ]
        );

        registry.unregister("public", "t", "first")?;
        drop(registry);
        let events = events.lock()?;
        assert_eq!(events[4..], ["first:remove", "first:close", "second:close"]);
        Ok(())
    }

    #[test]
    fn test_failure_is_a_trigger_error() -> Result<()> {
        let registry = TriggerRegistry::new();
        registry.register(
            definition("guard", TriggerTiming::Before),
            Box::new(Recorder {
                label: "guard",
                events: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }),
        )?;
        let result = registry.fire(
            "public",
            "t",
            TriggerTiming::Before,
            TriggerOperation::Insert,
            None,
            None,
        );
        assert!(matches!(result, Err(Error::Trigger(_))));
        Ok(())
    }
}
