use uuid::Uuid;

use crate::{UserId, STUB_UUID};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Role {
    Member,
    Admin,
}

/// Identity of whoever is issuing a request, as resolved from their session
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Caller {
    pub user: UserId,
    pub role: Role,
}

impl Caller {
    pub fn member(user: UserId) -> Caller {
        Caller {
            user,
            role: Role::Member,
        }
    }

    pub fn admin(user: UserId) -> Caller {
        Caller {
            user,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Edit and delete are allowed to the comment's author and to administrators
    pub fn can_modify(&self, author: UserId) -> bool {
        self.user == author || self.is_admin()
    }
}
