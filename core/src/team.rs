use serde::Serialize;
use serde_json::Value;

use crate::{TankId, TeamId};

/// Message sent by a tank to its team mates.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMessage {
    /// Tank that sent the message.
    #[serde(rename = "senderId")]
    pub sender: TankId,
    /// Tick during which the message was sent.
    pub tick: u64,
    /// Message payload, owned by the mailbox.
    pub message: Value,
}

/// Per-team channel delivering messages once per tick.
///
/// Messages sent while tick `N` is current become readable in tick `N + 1`.
#[derive(Clone, Debug, Default)]
pub struct Mailbox {
    tick: u64,
    outgoing: Vec<TeamMessage>,
    inbox: Vec<TeamMessage>,
}

impl Mailbox {
    /// Creates an empty mailbox positioned at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick the mailbox currently stamps outgoing messages with.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Queues messages for delivery on the next tick.
    pub fn send<I>(&mut self, sender: TankId, messages: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let tick = self.tick;
        self.outgoing
            .extend(messages.into_iter().map(|message| TeamMessage {
                sender,
                tick,
                message,
            }));
    }

    /// Moves to `tick`, delivering everything sent during the previous tick.
    ///
    /// Messages that were delivered before are dropped.
    pub fn advance(&mut self, tick: u64) {
        if tick == self.tick {
            return;
        }
        self.inbox = std::mem::take(&mut self.outgoing);
        self.tick = tick;
    }

    /// Messages delivered for the current tick.
    #[must_use]
    pub fn inbox(&self) -> &[TeamMessage] {
        &self.inbox
    }

    /// Number of messages waiting for the next delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }
}

/// Group of tanks sharing the ally relation and a mailbox.
#[derive(Clone, Debug)]
pub struct Team {
    id: TeamId,
    name: String,
    members: Vec<TankId>,
    mailbox: Mailbox,
}

impl Team {
    /// Creates an empty team.
    #[must_use]
    pub fn new(id: TeamId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: Vec::new(),
            mailbox: Mailbox::new(),
        }
    }

    /// Identifier of the team.
    #[must_use]
    pub const fn id(&self) -> TeamId {
        self.id
    }

    /// Display name of the team.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a tank to the team, ignoring duplicates.
    pub fn add_member(&mut self, tank: TankId) {
        if !self.members.contains(&tank) {
            self.members.push(tank);
        }
    }

    /// Members in the order they joined.
    #[must_use]
    pub fn members(&self) -> &[TankId] {
        &self.members
    }

    /// Number of members.
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Reports whether the tank is a member.
    #[must_use]
    pub fn contains(&self, tank: TankId) -> bool {
        self.members.contains(&tank)
    }

    /// Forwards messages from a member to the team mailbox.
    ///
    /// Messages from tanks outside the team are dropped.
    pub fn send_messages(&mut self, sender: TankId, messages: Vec<Value>) {
        if messages.is_empty() || !self.contains(sender) {
            return;
        }
        self.mailbox.send(sender, messages);
    }

    /// Read-only access to the team mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Mutable access to the team mailbox.
    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }
}

#[cfg(test)]
mod tests {
    use super::{Mailbox, Team};
    use crate::{TankId, TeamId};
    use serde_json::json;

    #[test]
    fn messages_arrive_on_the_following_tick_only() {
        let mut mailbox = Mailbox::new();
        mailbox.advance(1);
        mailbox.send(TankId::new(1), vec![json!({ "hello": 1 })]);
        assert!(mailbox.inbox().is_empty());

        mailbox.advance(2);
        assert_eq!(mailbox.inbox().len(), 1);
        assert_eq!(mailbox.inbox()[0].tick, 1);
        assert_eq!(mailbox.inbox()[0].sender, TankId::new(1));

        mailbox.advance(3);
        assert!(mailbox.inbox().is_empty());
    }

    #[test]
    fn repeated_advance_on_same_tick_keeps_inbox() {
        let mut mailbox = Mailbox::new();
        mailbox.send(TankId::new(1), vec![json!(1)]);
        mailbox.advance(1);
        mailbox.advance(1);
        assert_eq!(mailbox.inbox().len(), 1);
    }

    #[test]
    fn strangers_cannot_post_to_a_team() {
        let mut team = Team::new(TeamId::new(1), "red");
        team.add_member(TankId::new(1));
        team.add_member(TankId::new(1));
        assert_eq!(team.size(), 1);

        team.send_messages(TankId::new(2), vec![json!("spy")]);
        assert_eq!(team.mailbox().pending(), 0);

        team.send_messages(TankId::new(1), vec![json!("go")]);
        assert_eq!(team.mailbox().pending(), 1);
    }
}
