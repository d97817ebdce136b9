pub mod conversion;

use teamdocs_common::{types::Visibility, visibility::Actor};

use crate::store::CategoryRecord;

/// Categories have no owner, so TEAM means "any team member" and PRIVATE is
/// never listed.
pub fn visible_categories(actor: &Actor, categories: Vec<CategoryRecord>) -> Vec<CategoryRecord> {
    categories
        .into_iter()
        .filter(|category| match category.visibility {
            Visibility::Public => true,
            Visibility::Team => !actor.team_ids.is_empty(),
            Visibility::Private => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn category(name: &str, visibility: Visibility) -> CategoryRecord {
        CategoryRecord { id: Uuid::new_v4(), name: name.into(), visibility, created_at: Utc::now() }
    }

    fn names(categories: Vec<CategoryRecord>) -> Vec<String> {
        categories.into_iter().map(|category| category.name).collect()
    }

    #[test]
    fn team_categories_need_some_membership() {
        let all = vec![
            category("public", Visibility::Public),
            category("team", Visibility::Team),
            category("private", Visibility::Private),
        ];

        let member = Actor::new(Uuid::new_v4(), [Uuid::new_v4()]);
        assert_eq!(names(visible_categories(&member, all.clone())), ["public", "team"]);

        let loner = Actor::new(Uuid::new_v4(), []);
        assert_eq!(names(visible_categories(&loner, all)), ["public"]);
    }
}
