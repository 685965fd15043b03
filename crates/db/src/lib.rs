//! stammtisch-db – Persistenz-Schnittstelle
//!
//! Dieses Crate stellt das Repository-Pattern bereit, ueber das der Kern
//! Benutzer, Server, Rollen, Moderationsmassnahmen, Einladungen und
//! Einmal-Codes liest und schreibt. `MemoryDb` ist das mitgelieferte
//! Backend fuer den Einzelprozess-Betrieb und fuer Tests.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::{DbError, DbResult};
pub use memory::MemoryDb;
pub use repository::{
    DmRepository, FriendRepository, InviteRepository, ModerationRepository, Persistenz,
    RoleRepository, ServerRepository, UserRepository, VerificationRepository,
};
