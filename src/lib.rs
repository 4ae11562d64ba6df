#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

#![doc = include_str!("../Readme.md")]

extern crate feanor_math;

///
/// Errors of homomorphic operations.
///
pub mod error;

///
/// Parameters of the scheme and of bootstrapping.
///
pub mod params;

///
/// Negacyclic number-theoretic transform over a single prime.
///
pub mod ntt;

///
/// Polynomials in residue-number-system representation, i.e. one residue vector ("tower") per prime.
///
pub mod rns;

///
/// The modulus chain with its canonical scaling factors and the precomputed base conversions.
///
pub mod chain;

///
/// Hybrid key switching, used for relinearization and automorphisms.
///
pub mod keyswitch;

pub mod keys;

pub mod ciphertext;

///
/// Rescaling and level adjustment.
///
pub mod level;

///
/// The canonical embedding and the special DFT between coefficients and slots.
///
pub mod encoding;

///
/// Galois automorphisms `X -> X^k` and slot rotations.
///
pub mod automorphism;

pub mod context;

///
/// Linear transforms on the slots, evaluated with hoisted baby-step giant-step rotations.
///
pub mod lintransform;

///
/// Bootstrapping, i.e. refreshing a ciphertext by homomorphically evaluating its decryption.
///
pub mod bootstrap;

///
/// JSON serialization of evaluation keys and bootstrapping precomputations.
///
pub mod serialization;
