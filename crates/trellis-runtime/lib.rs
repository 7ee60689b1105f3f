//! # trellis
//! The runtime core of an LL(*) parser generator: a prediction engine that
//! drives lexical and syntactic analysis from a precompiled transition
//! network, caching decisions in lazily-built deterministic automata.
//!
//! The crate is the runtime only. Grammar compilation happens elsewhere;
//! this side consumes the serialized automaton ([`atn::AtnDeserializer`]),
//! simulates it ([`engine::ParserAtnSimulator`], [`engine::LexerAtnSimulator`]),
//! and talks to generated recognizers through the traits in [`recognizer`].

pub mod atn;
pub mod context;
pub mod dfa;
pub mod engine;
pub mod lexer;
pub mod prediction;
pub mod recognizer;
pub mod streams;
pub mod types;

pub use types::{TrellisError, TrellisResult};
