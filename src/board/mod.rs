//! Everything that talks to the board.
//!
//! The [`session::BoardSession`] trait is the only seam to the hardware;
//! the inspector, chunked writer, verifier and extractor are generic over
//! it, and [`testing::FakeBoard`] stands in for a real port in tests.

pub mod extract;
pub mod inspect;
pub mod scripts;
pub mod session;
pub mod testing;
pub mod verify;
pub mod writer;
