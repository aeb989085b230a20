// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent coalescing inbox.
//!
//! When telemetry arrives faster than the loop drains it, consecutive
//! reports from the same monitor collapse to the newest one. Coalescing only
//! replaces an agent's **most recent** queued event, so cross-event ordering
//! per agent is preserved and nothing that changes enforcement state (action
//! responses, lifecycle transitions, commands) is ever dropped.

use std::collections::VecDeque;

use crate::event::Event;
use crate::gateway::GatewayEvent;

#[derive(Default)]
pub struct Inbox {
    queue: VecDeque<Event>,
}

fn telemetry_key(event: &Event) -> Option<(&str, &str)> {
    match event {
        Event::Gateway(GatewayEvent::Telemetry { agent_id, monitor_id, .. }) => {
            Some((agent_id, monitor_id))
        }
        _ => None,
    }
}

fn agent_of(event: &Event) -> Option<&str> {
    match event {
        Event::Gateway(gw) => Some(gw.agent_id()),
        _ => None,
    }
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event, coalescing it into the previous telemetry of the
    /// same (agent, monitor) when that telemetry is still the agent's newest
    /// queued event.
    pub fn push(&mut self, event: Event) {
        if let Some((agent, monitor)) = telemetry_key(&event) {
            // Find the newest queued event for this agent.
            let newest = self
                .queue
                .iter()
                .rposition(|queued| agent_of(queued) == Some(agent));
            if let Some(idx) = newest {
                if telemetry_key(&self.queue[idx]).is_some_and(|(_, m)| m == monitor) {
                    self.queue[idx] = event;
                    return;
                }
            }
        }
        self.queue.push_back(event);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
