use std::collections::BTreeMap;

use serde::Serialize;

/// One executed command, successful or not. Times are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub cmd: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Named milestones plus the command ledger of one session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventHistory {
    #[serde(flatten)]
    pub events: BTreeMap<String, Vec<i64>>,
    pub commands: Vec<CommandRecord>,
}

impl EventHistory {
    pub fn record_event(&mut self, name: &str, at: i64) {
        self.events.entry(name.to_string()).or_default().push(at);
    }

    pub fn record_command(&mut self, cmd: &str, start_time: i64, end_time: i64) {
        self.commands.push(CommandRecord {
            cmd: cmd.to_string(),
            start_time,
            end_time,
        });
    }

    /// Only the named event series in `types`; the command ledger is kept
    /// when `commands` is listed.
    pub fn filtered(&self, types: &[String]) -> EventHistory {
        let events = self
            .events
            .iter()
            .filter(|(name, _)| types.iter().any(|t| t == *name))
            .map(|(name, stamps)| (name.clone(), stamps.clone()))
            .collect();
        let commands = if types.iter().any(|t| t == "commands") {
            self.commands.clone()
        } else {
            Vec::new()
        };
        EventHistory { events, commands }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_events_beside_commands() {
        let mut history = EventHistory::default();
        history.record_event("newSessionRequested", 10);
        history.record_event("newSessionRequested", 12);
        history.record_command("getStatus", 20, 25);
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["newSessionRequested"], serde_json::json!([10, 12]));
        assert_eq!(json["commands"][0]["cmd"], "getStatus");
        assert_eq!(json["commands"][0]["endTime"], 25);
    }

    #[test]
    fn filter_keeps_requested_series() {
        let mut history = EventHistory::default();
        history.record_event("a", 1);
        history.record_event("b", 2);
        history.record_command("x", 1, 2);
        let only_a = history.filtered(&["a".to_string()]);
        assert_eq!(only_a.events.len(), 1);
        assert!(only_a.commands.is_empty());
        let with_cmds = history.filtered(&["commands".to_string()]);
        assert!(with_cmds.events.is_empty());
        assert_eq!(with_cmds.commands.len(), 1);
    }
}
