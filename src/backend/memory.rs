use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{BackendError, BackendReply, KycBackend, BACKEND_SUCCESS};
use crate::models::UserData;

// ============================================================================
// In-memory KYC service
// ============================================================================
//
// Lock-guarded store answering the way the KYC service does as seen through
// `SoapClient`: missing or duplicate clients come back as HTTP status errors.
// Scripted outcomes queued with `fail_next*` are served before the store.
//
// ============================================================================

enum Scripted {
    Fail(BackendError),
    Reply(BackendReply),
}

#[derive(Clone, Default)]
pub(crate) struct InMemoryKyc {
    users: Arc<Mutex<HashMap<String, UserData>>>,
    scripted: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryKyc {
    pub fn with_users(users: impl IntoIterator<Item = UserData>) -> Self {
        let store = Self::default();
        {
            let mut map = store.users.lock().unwrap();
            for user in users {
                map.insert(user.client_id.clone(), user);
            }
        }
        store
    }

    pub fn fail_next(&self, error: BackendError) {
        self.scripted.lock().unwrap().push_back(Scripted::Fail(error));
    }

    pub fn fail_next_with_reply(&self, reply: BackendReply) {
        self.scripted.lock().unwrap().push_back(Scripted::Reply(reply));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.users.lock().unwrap().contains_key(client_id)
    }

    fn begin_call(&self) -> Option<Result<BackendReply, BackendError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scripted.lock().unwrap().pop_front().map(|s| match s {
            Scripted::Fail(e) => Err(e),
            Scripted::Reply(r) => Ok(r),
        })
    }
}

fn not_found(client_id: &str) -> BackendError {
    BackendError::Status {
        code: 404,
        message: format!("user with ClientID '{client_id}' not found"),
    }
}

fn success(message: &str, user_data: Option<UserData>) -> BackendReply {
    BackendReply {
        status: BACKEND_SUCCESS.to_string(),
        message: message.to_string(),
        user_data,
    }
}

#[async_trait]
impl KycBackend for InMemoryKyc {
    async fn read(&self, client_id: &str) -> Result<BackendReply, BackendError> {
        if let Some(scripted) = self.begin_call() {
            return scripted;
        }
        let users = self.users.lock().unwrap();
        users
            .get(client_id)
            .map(|user| success("User data retrieved", Some(user.clone())))
            .ok_or_else(|| not_found(client_id))
    }

    async fn create(&self, user: &UserData) -> Result<BackendReply, BackendError> {
        if let Some(scripted) = self.begin_call() {
            return scripted;
        }
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.client_id) {
            return Err(BackendError::Status {
                code: 409,
                message: format!("user with ClientID '{}' already exists", user.client_id),
            });
        }
        users.insert(user.client_id.clone(), user.clone());
        Ok(success("User created", Some(user.clone())))
    }

    async fn update(&self, user: &UserData) -> Result<BackendReply, BackendError> {
        if let Some(scripted) = self.begin_call() {
            return scripted;
        }
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user.client_id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(success("User updated", Some(user.clone())))
            }
            None => Err(not_found(&user.client_id)),
        }
    }

    async fn delete(&self, client_id: &str) -> Result<BackendReply, BackendError> {
        if let Some(scripted) = self.begin_call() {
            return scripted;
        }
        let mut users = self.users.lock().unwrap();
        users
            .remove(client_id)
            .map(|_| success("User deleted", None))
            .ok_or_else(|| not_found(client_id))
    }
}
