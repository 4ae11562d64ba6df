use serde::{Deserialize, Serialize};
use tracing::instrument;

use feanor_math::primitive_int::StaticRing;
use feanor_math::ring::*;
use feanor_math::rings::zn::ZnRingStore;

use crate::bootstrap::BootstrapPrecomputation;
use crate::context::CkksContext;
use crate::error::{CkksError, Result};
use crate::keys::{PublicKey, SecretKey, SwitchingKey};
use crate::params::CkksParams;
use crate::rns::{Format, RnsModulus, RnsPoly};

const ZZ: StaticRing<i64> = StaticRing::<i64>::RING;

///
/// An [`RnsPoly`] with its residues as integers in `[0, p)`, which is independent of the
/// modulus table.
///
#[derive(Serialize, Deserialize)]
struct RnsPolySerializable {
    moduli: Vec<usize>,
    format: Format,
    towers: Vec<Vec<u64>>
}

impl RnsPolySerializable {

    fn from(table: &[RnsModulus], poly: &RnsPoly) -> Self {
        Self {
            moduli: poly.moduli().to_vec(),
            format: poly.format(),
            towers: poly.moduli().iter().zip(poly.towers().iter()).map(|(m, tower)| {
                let Zp = table[*m].ring();
                tower.iter().map(|x| Zp.smallest_positive_lift(*x) as u64).collect()
            }).collect()
        }
    }

    fn into_poly(self, table: &[RnsModulus], ring_dimension: usize) -> Result<RnsPoly> {
        if self.moduli.len() != self.towers.len() {
            return Err(CkksError::Mismatch(format!("{} moduli but {} towers", self.moduli.len(), self.towers.len())));
        }
        let mut data = Vec::with_capacity(self.towers.len());
        for (m, tower) in self.moduli.iter().zip(self.towers.into_iter()) {
            let modulus = table.get(*m).ok_or_else(|| CkksError::Mismatch(format!("unknown modulus index {}", m)))?;
            if tower.len() != ring_dimension {
                return Err(CkksError::Mismatch(format!("tower of length {}, expected {}", tower.len(), ring_dimension)));
            }
            let Zp = modulus.ring();
            data.push(tower.into_iter().map(|x| if x < modulus.modulus() as u64 {
                Ok(Zp.coerce(&ZZ, x as i64))
            } else {
                Err(CkksError::Mismatch(format!("residue {} is not reduced modulo {}", x, modulus.modulus())))
            }).collect::<Result<Vec<_>>>()?);
        }
        return Ok(RnsPoly::from_towers(self.moduli, self.format, data));
    }
}

#[derive(Serialize, Deserialize)]
struct SwitchingKeySerializable {
    rows: Vec<(RnsPolySerializable, RnsPolySerializable)>
}

impl SwitchingKeySerializable {

    fn from(table: &[RnsModulus], key: &SwitchingKey) -> Self {
        Self {
            rows: key.rows().iter().map(|(b, a)| (RnsPolySerializable::from(table, b), RnsPolySerializable::from(table, a))).collect()
        }
    }

    fn into_key(self, table: &[RnsModulus], ring_dimension: usize) -> Result<SwitchingKey> {
        let rows = self.rows.into_iter()
            .map(|(b, a)| Ok((b.into_poly(table, ring_dimension)?, a.into_poly(table, ring_dimension)?)))
            .collect::<Result<Vec<_>>>()?;
        return Ok(SwitchingKey { rows });
    }
}

///
/// The primes of the modulus chain, to detect keys that were generated for other parameters.
///
fn chain_primes(ctx: &CkksContext) -> Vec<i64> {
    ctx.chain().moduli().iter().map(|m| m.modulus()).collect()
}

fn check_chain_primes(ctx: &CkksContext, primes: &[i64]) -> Result<()> {
    if primes != &chain_primes(ctx)[..] {
        return Err(CkksError::Mismatch("serialized data was created for a different modulus chain".to_owned()));
    }
    return Ok(());
}

#[derive(Serialize, Deserialize)]
struct EvalKeySetSerializable {
    primes: Vec<i64>,
    relinearization_key: Option<SwitchingKeySerializable>,
    automorphism_keys: Vec<(usize, SwitchingKeySerializable)>
}

#[derive(Serialize, Deserialize)]
struct PublicKeySerializable {
    primes: Vec<i64>,
    b: RnsPolySerializable,
    a: RnsPolySerializable
}

#[derive(Serialize, Deserialize)]
struct BootstrapPrecomputationSerializable {
    primes: Vec<i64>,
    precomputation: BootstrapPrecomputation
}

impl CkksContext {

    ///
    /// Serializes the parameters of this context, from which
    /// [`CkksContext::deserialize_context()`] recreates the same modulus chain.
    ///
    pub fn serialize_params(&self) -> Result<String> {
        return Ok(serde_json::to_string(self.params())?);
    }

    ///
    /// Creates a context from parameters serialized by [`CkksContext::serialize_params()`].
    /// The new context has no keys and no bootstrapping precomputations.
    ///
    #[instrument(skip_all)]
    pub fn deserialize_context(json: &str) -> Result<CkksContext> {
        let params: CkksParams = serde_json::from_str(json)?;
        return CkksContext::new(params);
    }

    pub fn serialize_secret_key(&self, sk: &SecretKey) -> Result<String> {
        return Ok(serde_json::to_string(sk)?);
    }

    pub fn deserialize_secret_key(&self, json: &str) -> Result<SecretKey> {
        let sk: SecretKey = serde_json::from_str(json)?;
        if sk.coefficients().len() != self.ring_dimension() {
            return Err(CkksError::Mismatch(format!("secret key with {} coefficients, expected {}", sk.coefficients().len(), self.ring_dimension())));
        }
        if sk.coefficients().iter().any(|c| c.abs() > 1) {
            return Err(CkksError::Mismatch("secret key coefficients must be ternary".to_owned()));
        }
        return Ok(sk);
    }

    ///
    /// Serializes the relinearization key and all automorphism keys as JSON.
    ///
    #[instrument(skip_all)]
    pub fn serialize_eval_keys(&self) -> Result<String> {
        let table = self.chain().moduli();
        let data = EvalKeySetSerializable {
            primes: chain_primes(self),
            relinearization_key: self.relinearization_key().ok().map(|key| SwitchingKeySerializable::from(table, &key)),
            automorphism_keys: self.automorphism_keys().into_iter().map(|(k, key)| (k, SwitchingKeySerializable::from(table, &key))).collect()
        };
        return Ok(serde_json::to_string(&data)?);
    }

    ///
    /// Adds the keys serialized by [`CkksContext::serialize_eval_keys()`] to this context,
    /// replacing existing keys for the same automorphisms.
    ///
    #[instrument(skip_all)]
    pub fn deserialize_eval_keys(&self, json: &str) -> Result<()> {
        let data: EvalKeySetSerializable = serde_json::from_str(json)?;
        check_chain_primes(self, &data.primes)?;
        let table = self.chain().moduli();
        let N = self.ring_dimension();
        let relinearization_key = data.relinearization_key.map(|key| key.into_key(table, N)).transpose()?;
        let automorphism_keys = data.automorphism_keys.into_iter()
            .map(|(k, key)| Ok((k, key.into_key(table, N)?)))
            .collect::<Result<Vec<_>>>()?;
        self.insert_keys(relinearization_key, automorphism_keys);
        return Ok(());
    }

    pub fn serialize_public_key(&self, pk: &PublicKey) -> Result<String> {
        let table = self.chain().moduli();
        return Ok(serde_json::to_string(&PublicKeySerializable {
            primes: chain_primes(self),
            b: RnsPolySerializable::from(table, &pk.b),
            a: RnsPolySerializable::from(table, &pk.a)
        })?);
    }

    pub fn deserialize_public_key(&self, json: &str) -> Result<PublicKey> {
        let data: PublicKeySerializable = serde_json::from_str(json)?;
        check_chain_primes(self, &data.primes)?;
        let table = self.chain().moduli();
        return Ok(PublicKey {
            b: data.b.into_poly(table, self.ring_dimension())?,
            a: data.a.into_poly(table, self.ring_dimension())?
        });
    }

    ///
    /// Serializes the bootstrapping precomputation for `slots` slots. The encoded transforms
    /// are not included.
    ///
    pub fn serialize_bootstrap_precomputation(&self, slots: usize) -> Result<String> {
        let precomputation = self.bootstrap_precomputation(slots)?;
        return Ok(serde_json::to_string(&BootstrapPrecomputationSerializable {
            primes: chain_primes(self),
            precomputation: (*precomputation).clone()
        })?);
    }

    ///
    /// Stores the serialized bootstrapping precomputation and returns its slot count.
    /// Before bootstrapping, [`CkksContext::eval_bootstrap_precompute()`] must be called
    /// for this slot count.
    ///
    pub fn deserialize_bootstrap_precomputation(&self, json: &str) -> Result<usize> {
        let data: BootstrapPrecomputationSerializable = serde_json::from_str(json)?;
        check_chain_primes(self, &data.primes)?;
        let slots = data.precomputation.slots();
        self.insert_bootstrap_precomputation(data.precomputation);
        return Ok(slots);
    }
}

#[cfg(test)]
use rand::{SeedableRng, rngs::StdRng};
#[cfg(test)]
use crate::context::{assert_close, pattern_values, test_context, test_values};

#[test]
fn test_serialize_eval_keys() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(10);
    let keys = ctx.key_gen(&mut rng);
    ctx.eval_mult_key_gen(&keys.secret_key, &mut rng);
    ctx.eval_rotate_key_gen(&keys.secret_key, &[1, -3], &mut rng).unwrap();
    let json = ctx.serialize_eval_keys().unwrap();
    let pk_json = ctx.serialize_public_key(&keys.public_key).unwrap();

    let other = test_context(4);
    other.deserialize_eval_keys(&json).unwrap();
    let pk = other.deserialize_public_key(&pk_json).unwrap();
    let values = test_values(32, 11);
    let ct = other.encrypt_values(&pk, &values, 32, &mut rng).unwrap();

    let rotated = other.eval_at_index(&ct, -3).unwrap();
    let expected = (0..32).map(|i| values[(i + 29) % 32]).collect::<Vec<_>>();
    assert_close(&expected, &other.decrypt_and_decode(&keys.secret_key, &rotated), 1e-4);

    let squared = other.eval_mult(&ct, &ct).unwrap();
    let expected = values.iter().map(|x| x * x).collect::<Vec<_>>();
    assert_close(&expected, &other.decrypt_and_decode(&keys.secret_key, &squared), 1e-4);

    assert!(matches!(test_context(5).deserialize_eval_keys(&json), Err(CkksError::Mismatch(_))));
    assert!(matches!(other.deserialize_eval_keys("{"), Err(CkksError::Serialization(_))));
}

#[test]
fn test_serialize_context_and_secret_key() {
    let ctx = test_context(4);
    let mut rng = StdRng::seed_from_u64(14);
    let keys = ctx.key_gen(&mut rng);

    let other = CkksContext::deserialize_context(&ctx.serialize_params().unwrap()).unwrap();
    assert_eq!(ctx.params(), other.params());
    assert_eq!(chain_primes(&ctx), chain_primes(&other));
    let sk = other.deserialize_secret_key(&ctx.serialize_secret_key(&keys.secret_key).unwrap()).unwrap();
    assert_eq!(keys.secret_key, sk);

    let values = test_values(16, 15);
    let ct = ctx.encrypt_values(&keys.public_key, &values, 16, &mut rng).unwrap();
    assert_close(&values, &other.decrypt_and_decode(&sk, &ct), 1e-9);

    assert!(matches!(test_context(4).deserialize_secret_key(&test_context(4).serialize_secret_key(&SecretKey::from_coefficients(vec![0; 32])).unwrap()), Err(CkksError::Mismatch(_))));
    assert!(matches!(other.deserialize_secret_key(&other.serialize_secret_key(&SecretKey::from_coefficients(vec![2; 64])).unwrap()), Err(CkksError::Mismatch(_))));
    assert!(matches!(CkksContext::deserialize_context("{}"), Err(CkksError::Serialization(_))));
}

#[test]
fn test_serialize_bootstrap_precomputation() {
    let ctx = test_context(14);
    let mut rng = StdRng::seed_from_u64(12);
    let keys = ctx.key_gen(&mut rng);
    let full_slots = ctx.max_slots();
    for slots in [full_slots, full_slots / 2] {
        ctx.eval_bootstrap_setup([1, 1], [32, 32], slots).unwrap();
        ctx.eval_bootstrap_key_gen(&keys.secret_key, slots, &mut rng).unwrap();
    }
    let context_json = ctx.serialize_params().unwrap();
    let secret_key_json = ctx.serialize_secret_key(&keys.secret_key).unwrap();
    let public_key_json = ctx.serialize_public_key(&keys.public_key).unwrap();
    let eval_keys_json = ctx.serialize_eval_keys().unwrap();
    let precomputation_json = [full_slots, full_slots / 2].map(|slots| ctx.serialize_bootstrap_precomputation(slots).unwrap());

    let other = CkksContext::deserialize_context(&context_json).unwrap();
    let sk = other.deserialize_secret_key(&secret_key_json).unwrap();
    let pk = other.deserialize_public_key(&public_key_json).unwrap();
    other.deserialize_eval_keys(&eval_keys_json).unwrap();
    for (json, slots) in precomputation_json.iter().zip([full_slots, full_slots / 2]) {
        assert_eq!(slots, other.deserialize_bootstrap_precomputation(json).unwrap());
    }

    for slots in [full_slots, full_slots / 2] {
        let values = pattern_values(slots);
        let ct = other.encrypt_at_level(&pk, &values, slots, 13, &mut rng).unwrap();
        assert!(matches!(other.eval_bootstrap(&ct, 1, 0), Err(CkksError::MissingPrecomputation { .. })));
        other.eval_bootstrap_precompute(slots).unwrap();

        let expected = ctx.decrypt_and_decode(&keys.secret_key, &ctx.eval_bootstrap(&ct, 1, 0).unwrap());
        let result = other.eval_bootstrap(&ct, 1, 0).unwrap();
        assert_eq!(ctx.bootstrap_precomputation(slots).unwrap().output_towers(), result.num_towers());
        let actual = other.decrypt_and_decode(&sk, &result);
        assert_close(&values, &expected, 1e-4);
        assert_close(&values, &actual, 1e-4);
        assert_close(&expected, &actual, 1e-4);
    }
}
