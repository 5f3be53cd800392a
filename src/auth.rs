use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use error_stack::{Report, ResultExt};
use tracing::info;

use crate::error::AuthError;
use crate::model::User;
use crate::storage::WalletStore;

/// Argon2id PHC string for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, Report<AuthError>> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Report::new(AuthError::Hash).attach(e.to_string()))
}

/// Check `password` against a stored PHC string.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, Report<AuthError>> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| Report::new(AuthError::Hash).attach(format!("stored hash: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Report::new(AuthError::Hash).attach(e.to_string())),
    }
}

/// Create a user whose password is stored hashed.
pub async fn register(
    store: &dyn WalletStore,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User, Report<AuthError>> {
    let hash = hash_password(password)?;
    store
        .create_user(name, email, &hash)
        .await
        .change_context(AuthError::Storage)
}

/// Resolve `email`/`password` to an active user.
///
/// Unknown emails and wrong passwords both yield `InvalidCredentials`.
pub async fn login(
    store: &dyn WalletStore,
    email: &str,
    password: &str,
) -> Result<User, Report<AuthError>> {
    let (user, stored) = store
        .find_credentials(email)
        .await
        .change_context(AuthError::Storage)?
        .ok_or_else(|| Report::new(AuthError::InvalidCredentials))?;

    if !verify_password(password, &stored)? {
        return Err(Report::new(AuthError::InvalidCredentials));
    }
    if !user.active {
        return Err(Report::new(AuthError::Inactive).attach(format!("user_id: {}", user.id)));
    }

    info!(user_id = user.id, "user logged in");
    Ok(user)
}

/// Require `user_id` to name an existing, active user.
pub async fn authorize(store: &dyn WalletStore, user_id: i64) -> Result<User, Report<AuthError>> {
    let user = store
        .get_user(user_id)
        .await
        .change_context(AuthError::Storage)?
        .ok_or_else(|| Report::new(AuthError::UnknownUser { user_id }))?;

    if !user.active {
        return Err(Report::new(AuthError::Inactive).attach(format!("user_id: {user_id}")));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::SqliteStorage;

    #[test]
    fn hash_is_salted_and_verifiable() {
        let first = hash_password("hunter2").unwrap();
        let second = hash_password("hunter2").unwrap();

        assert_ne!(first, "hunter2");
        assert_ne!(first, second);
        assert!(verify_password("hunter2", &first).unwrap());
        assert!(!verify_password("hunter3", &first).unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        let err = verify_password("pw", "not-a-phc-string").unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Hash));
    }

    #[tokio::test]
    async fn login_checks_password_and_active_flag() {
        let storage = SqliteStorage::in_memory().await;
        let user = register(&storage, "Lea", "lea@example.com", "s3cret")
            .await
            .unwrap();

        let logged_in = login(&storage, "lea@example.com", "s3cret").await.unwrap();
        assert_eq!(logged_in, user);

        let err = login(&storage, "lea@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::InvalidCredentials));

        let err = login(&storage, "nobody@example.com", "s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), AuthError::InvalidCredentials));

        storage.set_user_active(user.id, false).await.unwrap();
        let err = login(&storage, "lea@example.com", "s3cret").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Inactive));
    }

    #[tokio::test]
    async fn authorize_rejects_unknown_and_inactive_users() {
        let storage = SqliteStorage::in_memory().await;
        let user = storage
            .create_user("Max", "max@example.com", "hash")
            .await
            .unwrap();

        assert_eq!(authorize(&storage, user.id).await.unwrap(), user);

        let err = authorize(&storage, 9_999).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthError::UnknownUser { user_id: 9_999 }
        ));

        storage.set_user_active(user.id, false).await.unwrap();
        let err = authorize(&storage, user.id).await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Inactive));
    }
}
