use actix::prelude::*;
use log::debug;
use std::collections::HashMap;

use crate::models::{LobbyStatus, LobbySummary};

/// Fire-and-forget projection update sent by lobbies.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum DirectoryUpdate {
    Add(LobbySummary),
    Remove { lobby_id: String },
}

#[derive(Message, Debug, Clone, Default)]
#[rtype(result = "Vec<LobbySummary>")]
pub struct ListLobbies {
    pub status: Option<LobbyStatus>,
    pub include_private: bool,
}

/// Registry of currently open lobbies, used for discovery.
#[derive(Default)]
pub struct LobbyDirectory {
    lobbies: HashMap<String, LobbySummary>,
}

impl LobbyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, filter: &ListLobbies) -> Vec<LobbySummary> {
        let mut lobbies: Vec<LobbySummary> = self
            .lobbies
            .values()
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .filter(|l| filter.include_private || !l.settings.is_private)
            .cloned()
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        lobbies
    }
}

impl Actor for LobbyDirectory {
    type Context = Context<Self>;
}

impl Handler<DirectoryUpdate> for LobbyDirectory {
    type Result = ();

    fn handle(&mut self, msg: DirectoryUpdate, _ctx: &mut Context<Self>) {
        match msg {
            DirectoryUpdate::Add(summary) => {
                debug!("Directory: listing lobby {}", summary.id);
                self.lobbies.insert(summary.id.clone(), summary);
            }
            DirectoryUpdate::Remove { lobby_id } => {
                if self.lobbies.remove(&lobby_id).is_some() {
                    debug!("Directory: unlisted lobby {}", lobby_id);
                }
            }
        }
    }
}

impl Handler<ListLobbies> for LobbyDirectory {
    type Result = MessageResult<ListLobbies>;

    fn handle(&mut self, msg: ListLobbies, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.list(&msg))
    }
}
