use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::{
        repo::UserRepo,
        repo_types::{NewUser, ProfileChanges, User},
    },
    bugs::{
        repo::BugRepo,
        repo_types::{Bug, BugFilter},
    },
    db::RepoError,
    projects::{repo::ProjectRepo, repo_types::Project},
};

/// Process-local backend used when no database is configured, and by tests.
/// Enforces the same unique columns as the SQL schema.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // insertion order; listing sorts on created_at
    bugs: Vec<Bug>,
    projects: Vec<Project>,
}

impl Inner {
    fn user_clash(&self, email: &str, username: &str, exclude: Option<Uuid>) -> Option<&'static str> {
        let others = self.users.values().filter(|u| Some(u.id) != exclude);
        for u in others {
            if u.email == email {
                return Some("users_email_key");
            }
            if u.username == username {
                return Some("users_username_key");
            }
        }
        None
    }

    fn bug_count(&self, project_id: Uuid) -> i64 {
        self.bugs
            .iter()
            .filter(|b| b.project_id == Some(project_id))
            .count() as i64
    }

    fn with_count(&self, p: &Project) -> Project {
        Project {
            bug_count: self.bug_count(p.id),
            ..p.clone()
        }
    }
}

/// Newest first; records sharing a timestamp keep latest-inserted first.
fn newest_first<T: Clone>(items: &[T], created_at: impl Fn(&T) -> OffsetDateTime) -> Vec<T> {
    let mut out: Vec<T> = items.iter().rev().cloned().collect();
    out.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    out
}

impl MemoryStore {
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Applies `change` to the stored user under the write lock.
    async fn modify_user(&self, id: Uuid, change: impl FnOnce(&mut User)) -> Option<User> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&id)?;
        change(user);
        Some(user.clone())
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_conflicting(
        &self,
        email: Option<&str>,
        username: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<User>, RepoError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| Some(u.id) != exclude)
            .find(|u| email == Some(u.email.as_str()) || username == Some(u.username.as_str()))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let mut inner = self.inner.write().await;
        if let Some(field) = inner.user_clash(&new.email, &new.username, None) {
            return Err(RepoError::Conflict(field.to_string()));
        }
        let user = new.into_user(OffsetDateTime::now_utc());
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        Ok(self.modify_user(id, |u| u.last_login = Some(at)).await)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, RepoError> {
        Ok(self
            .modify_user(id, |u| u.password_hash = password_hash.to_string())
            .await)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<User>, RepoError> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.users.get(&id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        changes.apply_to(&mut next);
        if let Some(field) = inner.user_clash(&next.email, &next.username, Some(id)) {
            return Err(RepoError::Conflict(field.to_string()));
        }
        inner.users.insert(id, next.clone());
        Ok(Some(next))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError> {
        Ok(self.modify_user(id, |u| u.is_active = active).await)
    }
}

#[async_trait]
impl BugRepo for MemoryStore {
    async fn list(&self, filter: &BugFilter) -> Result<Vec<Bug>, RepoError> {
        let inner = self.inner.read().await;
        let matching: Vec<Bug> = inner
            .bugs
            .iter()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        Ok(newest_first(&matching, |b| b.created_at))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Bug>, RepoError> {
        let inner = self.inner.read().await;
        Ok(inner.bugs.iter().find(|b| b.id == id).cloned())
    }

    async fn create(&self, bug: Bug) -> Result<Bug, RepoError> {
        let mut inner = self.inner.write().await;
        if inner.bugs.iter().any(|b| b.bug_number == bug.bug_number) {
            return Err(RepoError::Conflict("bugs_bug_number_key".into()));
        }
        inner.bugs.push(bug.clone());
        Ok(bug)
    }

    async fn update(
        &self,
        bug: &Bug,
        expected: OffsetDateTime,
    ) -> Result<Option<Bug>, RepoError> {
        let mut inner = self.inner.write().await;
        let Some(slot) = inner
            .bugs
            .iter_mut()
            .find(|b| b.id == bug.id && b.updated_at == expected)
        else {
            return Ok(None);
        };
        // bug_number and created_at are immutable
        let updated = Bug {
            bug_number: slot.bug_number.clone(),
            created_at: slot.created_at,
            ..bug.clone()
        };
        *slot = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Bug>, RepoError> {
        let mut inner = self.inner.write().await;
        let Some(pos) = inner.bugs.iter().position(|b| b.id == id) else {
            return Ok(None);
        };
        Ok(Some(inner.bugs.remove(pos)))
    }
}

#[async_trait]
impl ProjectRepo for MemoryStore {
    async fn list(&self) -> Result<Vec<Project>, RepoError> {
        let inner = self.inner.read().await;
        let counted: Vec<Project> = inner.projects.iter().map(|p| inner.with_count(p)).collect();
        Ok(newest_first(&counted, |p| p.created_at))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Project>, RepoError> {
        let inner = self.inner.read().await;
        Ok(inner
            .projects
            .iter()
            .find(|p| p.id == id)
            .map(|p| inner.with_count(p)))
    }

    async fn create(&self, project: Project) -> Result<Project, RepoError> {
        let mut inner = self.inner.write().await;
        if inner.projects.iter().any(|p| p.key == project.key) {
            return Err(RepoError::Conflict("projects_key_key".into()));
        }
        inner.projects.push(project.clone());
        Ok(inner.with_count(&project))
    }

    async fn update(&self, project: &Project) -> Result<Option<Project>, RepoError> {
        let mut inner = self.inner.write().await;
        if inner
            .projects
            .iter()
            .any(|p| p.id != project.id && p.key == project.key)
        {
            return Err(RepoError::Conflict("projects_key_key".into()));
        }
        let Some(slot) = inner.projects.iter_mut().find(|p| p.id == project.id) else {
            return Ok(None);
        };
        slot.name = project.name.clone();
        slot.key = project.key.clone();
        slot.description = project.description.clone();
        slot.status = project.status;
        slot.members = project.members.clone();
        let saved = slot.clone();
        Ok(Some(inner.with_count(&saved)))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Project>, RepoError> {
        let mut inner = self.inner.write().await;
        let Some(pos) = inner.projects.iter().position(|p| p.id == id) else {
            return Ok(None);
        };
        let removed = inner.with_count(&inner.projects[pos]);
        inner.projects.remove(pos);
        for bug in inner.bugs.iter_mut().filter(|b| b.project_id == Some(id)) {
            bug.project_id = None;
        }
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;
    use crate::bugs::services::new_bug;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            role: Role::default(),
        }
    }

    #[tokio::test]
    async fn users_are_unique_on_email_and_username() {
        let store = MemoryStore::default();
        let alice = UserRepo::create(&store, new_user("alice", "a@x.io")).await.unwrap();
        assert!(matches!(
            UserRepo::create(&store, new_user("alice2", "a@x.io")).await,
            Err(RepoError::Conflict(f)) if f == "users_email_key"
        ));
        assert!(matches!(
            UserRepo::create(&store, new_user("alice", "b@x.io")).await,
            Err(RepoError::Conflict(f)) if f == "users_username_key"
        ));

        let bob = UserRepo::create(&store, new_user("bob", "b@x.io")).await.unwrap();
        let rename = ProfileChanges {
            username: Some("alice".into()),
            ..ProfileChanges::default()
        };
        assert!(matches!(
            store.update_profile(bob.id, &rename).await,
            Err(RepoError::Conflict(_))
        ));
        assert_eq!(store.find_by_id(bob.id).await.unwrap().unwrap().username, "bob");

        let hit = store.find_conflicting(Some("a@x.io"), None, Some(bob.id)).await.unwrap();
        assert_eq!(hit.map(|u| u.id), Some(alice.id));
        assert!(store
            .find_conflicting(Some("a@x.io"), Some("alice"), Some(alice.id))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.user_count().await, 2);
    }

    #[tokio::test]
    async fn bugs_list_newest_first_and_reject_duplicate_numbers() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let req = |t: &str| crate::bugs::dto::CreateBugRequest {
            title: Some(t.into()),
            description: Some("d".into()),
            ..Default::default()
        };
        let older = new_bug(req("older"), None, now - time::Duration::minutes(1)).unwrap();
        let newer = new_bug(req("newer"), None, now).unwrap();
        BugRepo::create(&store, newer.clone()).await.unwrap();
        BugRepo::create(&store, older.clone()).await.unwrap();

        let titles: Vec<String> = BugRepo::list(&store, &BugFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["newer", "older"]);

        let mut dup = new_bug(req("dup"), None, now).unwrap();
        dup.bug_number = older.bug_number.clone();
        assert!(matches!(
            BugRepo::create(&store, dup).await,
            Err(RepoError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn bug_update_is_guarded_by_updated_at() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let bug = new_bug(
            crate::bugs::dto::CreateBugRequest {
                title: Some("t".into()),
                description: Some("d".into()),
                ..Default::default()
            },
            None,
            now,
        )
        .unwrap();
        BugRepo::create(&store, bug.clone()).await.unwrap();

        let first = Bug {
            title: "first".into(),
            updated_at: now + time::Duration::seconds(1),
            ..bug.clone()
        };
        assert!(BugRepo::update(&store, &first, now).await.unwrap().is_some());

        let late = Bug {
            title: "late".into(),
            updated_at: now + time::Duration::seconds(2),
            ..bug
        };
        assert!(BugRepo::update(&store, &late, now).await.unwrap().is_none());
        let stored = BugRepo::find(&store, first.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "first");
    }

    #[tokio::test]
    async fn project_update_rejects_taken_key() {
        let store = MemoryStore::default();
        let now = OffsetDateTime::now_utc();
        let project = |key: &str| Project {
            id: Uuid::new_v4(),
            name: key.into(),
            key: key.into(),
            description: String::new(),
            status: Default::default(),
            owner: "sarah".into(),
            members: vec!["sarah".into()],
            bug_count: 0,
            created_at: now,
        };
        ProjectRepo::create(&store, project("WEB")).await.unwrap();
        let api = ProjectRepo::create(&store, project("API")).await.unwrap();

        let renamed = Project {
            key: "WEB".into(),
            ..api.clone()
        };
        assert!(matches!(
            ProjectRepo::update(&store, &renamed).await,
            Err(RepoError::Conflict(f)) if f == "projects_key_key"
        ));
        let stored = ProjectRepo::find(&store, api.id).await.unwrap().unwrap();
        assert_eq!(stored.key, "API");
    }
}
