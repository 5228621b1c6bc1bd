//! Talespin Content: the read-only collaborators of the turn pipeline.
//!
//! The pipeline looks up era-pack definitions (locations, NPCs, factions,
//! quests) through [`ContentSource`] and asks a [`LoreRetriever`] for ranked
//! lore and style snippets. Both are consulted, never written.

pub mod era_pack;
pub mod retrieval;

pub use era_pack::{
    ContentSource, EmptyContent, EraPack, FactionDef, LocationDef, LoreEntry, NpcDef, QuestDef,
    SpawnEntry,
};
pub use retrieval::{
    KeywordRetriever, LoreRetriever, NoRetrieval, RetrievalError, RetrievalQuery, Snippet,
    SnippetKind,
};
