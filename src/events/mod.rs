pub mod guild;
pub mod message;
pub mod reaction;

pub use guild::{handle_guild_create, handle_guild_delete, handle_member_add};
pub use message::{handle_message_delete, handle_message_delete_bulk};
pub use reaction::{
    handle_reaction_add, handle_reaction_remove, handle_reaction_remove_all,
    handle_reaction_remove_emoji,
};
