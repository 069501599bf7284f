use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::mail::is_valid_email;
use crate::workflows::requests::{
    Department, DepartmentCode, DirectoryRepository, LogEntry, LogState, RepositoryError, Role,
    StoredAccount, UserId, UserProfile, WorkflowRepository,
};

pub const MIN_PASSWORD_CHARS: usize = 6;

/// Sign-up form. `department` is a department code such as `DL`.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
}

/// Sign-in form. The declared role and department must match the account.
#[derive(Debug, Clone, Deserialize)]
pub struct SignIn {
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
}

pub struct AccountService<R> {
    repository: Arc<R>,
}

impl<R> AccountService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn register(&self, form: Registration) -> Result<UserProfile, AccountError> {
        let name = form.name.trim().to_string();
        if name.is_empty() {
            return Err(AccountError::Validation("le nom est requis".to_string()));
        }
        let email = form.email.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return Err(AccountError::Validation(format!(
                "adresse e-mail invalide: {email}"
            )));
        }
        if form.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AccountError::Validation(format!(
                "le mot de passe doit contenir au moins {MIN_PASSWORD_CHARS} caractères"
            )));
        }
        let department = self.registration_department(form.role, form.department.as_deref())?;

        if self.repository.account_by_email(&email)?.is_some() {
            return Err(AccountError::EmailTaken);
        }
        if form.role.is_staff() {
            let scope = department.as_ref().filter(|_| form.role.is_department_scoped());
            if !self.repository.users_with_role(form.role, scope)?.is_empty() {
                return Err(AccountError::RoleTaken {
                    role: form.role,
                    department: scope.cloned(),
                });
            }
        }

        let password_hash = hash_password(form.password).await?;
        let now = Utc::now();
        let profile = UserProfile {
            id: UserId::generate(),
            name,
            email,
            role: form.role,
            department,
            created_at: now,
        };
        let log = LogEntry::new(
            None,
            LogState::Inscription,
            profile.id.clone(),
            format!("Inscription de {} ({})", profile.name, profile.role),
            now,
        );
        let profile = self
            .repository
            .insert_account(
                StoredAccount {
                    profile,
                    password_hash,
                },
                log,
            )
            .map_err(|err| match err {
                RepositoryError::Conflict => AccountError::EmailTaken,
                other => AccountError::Repository(other),
            })?;
        info!(user = %profile.id, role = %profile.role, "account registered");
        Ok(profile)
    }

    pub async fn sign_in(&self, form: SignIn) -> Result<UserProfile, AccountError> {
        let Some(account) = self.repository.account_by_email(&form.email)? else {
            warn!("sign-in with unknown email");
            return Err(AccountError::InvalidCredentials);
        };
        if !verify_password(form.password, account.password_hash).await? {
            warn!(user = %account.profile.id, "sign-in with wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        let profile = account.profile;
        if profile.role != form.role {
            return Err(AccountError::RoleMismatch(profile.role));
        }
        if profile.role.requires_department() {
            let declared = form
                .department
                .as_deref()
                .map(DepartmentCode::new)
                .filter(|code| !code.as_str().is_empty());
            if declared != profile.department {
                return Err(AccountError::DepartmentMismatch);
            }
        }

        self.repository.append_log(LogEntry::new(
            None,
            LogState::Connexion,
            profile.id.clone(),
            format!("Connexion de {}", profile.name),
            Utc::now(),
        ))?;
        info!(user = %profile.id, "signed in");
        Ok(profile)
    }

    pub fn profile(&self, id: &UserId) -> Result<UserProfile, AccountError> {
        self.repository
            .user(id)?
            .ok_or(AccountError::UnknownUser)
    }

    pub fn departments(&self) -> Result<Vec<Department>, AccountError> {
        Ok(self.repository.departments()?)
    }

    fn registration_department(
        &self,
        role: Role,
        department: Option<&str>,
    ) -> Result<Option<DepartmentCode>, AccountError> {
        let code = department
            .map(DepartmentCode::new)
            .filter(|code| !code.as_str().is_empty());
        match (role.requires_department(), code) {
            (true, None) => Err(AccountError::Validation(format!(
                "un département est requis pour le rôle {role}"
            ))),
            (false, Some(_)) => Err(AccountError::Validation(format!(
                "le rôle {role} n'est rattaché à aucun département"
            ))),
            (false, None) => Ok(None),
            (true, Some(code)) => {
                if self.repository.department(&code)?.is_none() {
                    return Err(AccountError::UnknownDepartment(code));
                }
                Ok(Some(code))
            }
        }
    }
}

async fn hash_password(password: String) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AccountError::Hashing(err.to_string()))
    })
    .await
    .map_err(|err| AccountError::Hashing(err.to_string()))?
}

async fn verify_password(password: String, stored: String) -> Result<bool, AccountError> {
    tokio::task::spawn_blocking(move || {
        let parsed = match PasswordHash::new(&stored) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|err| AccountError::Hashing(err.to_string()))
}

fn scope_suffix(department: &Option<DepartmentCode>) -> String {
    department
        .as_ref()
        .map(|code| format!(" pour le département {code}"))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("un compte existe déjà pour cette adresse e-mail")]
    EmailTaken,
    #[error("le rôle {role} est déjà attribué{}", scope_suffix(.department))]
    RoleTaken {
        role: Role,
        department: Option<DepartmentCode>,
    },
    #[error("département inconnu: {0}")]
    UnknownDepartment(DepartmentCode),
    #[error("identifiants invalides")]
    InvalidCredentials,
    #[error("ce compte a le rôle {0}")]
    RoleMismatch(Role),
    #[error("le département ne correspond pas à ce compte")]
    DepartmentMismatch,
    #[error("utilisateur introuvable")]
    UnknownUser,
    #[error("hachage du mot de passe impossible: {0}")]
    Hashing(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
