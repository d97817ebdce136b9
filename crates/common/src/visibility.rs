// Access evaluation for visibility-scoped library nodes.

use std::collections::HashSet;

use uuid::Uuid;

use crate::types::Visibility;

/// The caller as seen by access checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub team_ids: HashSet<Uuid>,
}

impl Actor {
    pub fn new(user_id: Uuid, team_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self { user_id, team_ids: team_ids.into_iter().collect() }
    }

    pub fn is_member_of(&self, team_id: Uuid) -> bool {
        self.team_ids.contains(&team_id)
    }
}

/// Anything that carries a visibility tier, an owning team and a creator.
pub trait Scoped {
    fn visibility(&self) -> Visibility;
    fn owner_team_id(&self) -> Uuid;
    fn creator_id(&self) -> Uuid;
}

pub fn can_access(actor: &Actor, visibility: Visibility, team_id: Uuid, creator_id: Uuid) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Team => actor.is_member_of(team_id),
        Visibility::Private => creator_id == actor.user_id,
    }
}

pub fn can_access_node<N: Scoped + ?Sized>(actor: &Actor, node: &N) -> bool {
    can_access(actor, node.visibility(), node.owner_team_id(), node.creator_id())
}

/// Silent list filtering: inaccessible nodes are dropped, never reported.
pub fn filter_accessible<N: Scoped>(actor: &Actor, nodes: Vec<N>) -> Vec<N> {
    nodes.into_iter().filter(|node| can_access_node(actor, node)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        label: &'static str,
        visibility: Visibility,
        team_id: Uuid,
        creator_id: Uuid,
    }

    impl Scoped for Node {
        fn visibility(&self) -> Visibility {
            self.visibility
        }
        fn owner_team_id(&self) -> Uuid {
            self.team_id
        }
        fn creator_id(&self) -> Uuid {
            self.creator_id
        }
    }

    struct Fixture {
        t1: Uuid,
        u1: Uuid,
        nodes: Vec<Node>,
    }

    fn fixture() -> Fixture {
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let nodes = vec![
            Node { label: "public", visibility: Visibility::Public, team_id: t2, creator_id: u2 },
            Node { label: "team-t1", visibility: Visibility::Team, team_id: t1, creator_id: u2 },
            Node { label: "team-t2", visibility: Visibility::Team, team_id: t2, creator_id: u2 },
            Node { label: "private-u1", visibility: Visibility::Private, team_id: t1, creator_id: u1 },
            Node { label: "private-u2", visibility: Visibility::Private, team_id: t1, creator_id: u2 },
        ];
        Fixture { t1, u1, nodes }
    }

    fn labels(nodes: Vec<Node>) -> Vec<&'static str> {
        nodes.into_iter().map(|node| node.label).collect()
    }

    #[test]
    fn team_member_sees_public_own_team_and_own_private() {
        let Fixture { t1, u1, nodes } = fixture();
        let actor = Actor::new(u1, [t1]);

        assert_eq!(labels(filter_accessible(&actor, nodes)), ["public", "team-t1", "private-u1"]);
    }

    #[test]
    fn other_team_member_does_not_see_foreign_private_nodes() {
        let Fixture { t1, nodes, .. } = fixture();
        let actor = Actor::new(Uuid::new_v4(), [t1]);

        assert_eq!(labels(filter_accessible(&actor, nodes)), ["public", "team-t1"]);
    }

    #[test]
    fn user_without_teams_sees_only_public() {
        let Fixture { nodes, .. } = fixture();
        let actor = Actor::new(Uuid::new_v4(), []);

        assert_eq!(labels(filter_accessible(&actor, nodes)), ["public"]);
    }

    #[test]
    fn private_access_ignores_team_membership() {
        let team = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let teammate = Actor::new(Uuid::new_v4(), [team]);

        assert!(!can_access(&teammate, Visibility::Private, team, creator));
        assert!(can_access(&Actor::new(creator, []), Visibility::Private, team, creator));
    }
}
