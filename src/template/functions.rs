//! Per-render table of content functions.
//!
//! A fresh [`FunctionTable`] is built for every render and handed to the
//! template as the `fx` object. It owns the fragment pools it draws from, its
//! own RNG, and the salt used for CSS class obfuscation, so two concurrent
//! renders never observe each other's state.

use std::sync::{Arc, Mutex};

use minijinja::{
    Error, ErrorKind, State,
    value::{Object, Value, from_args},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use sha2::{Digest, Sha256};

use crate::{
    cache::mutex_lock,
    domain::{entities::ContentFragments, pinyin, slug::derive_slug},
};

/// Upper bound on items produced by `iterate`.
pub const MAX_ITERATIONS: i64 = 10_000;

const URL_FALLBACK_SLUG: &str = "page";

#[derive(Debug)]
pub struct FunctionTable {
    fragments: Arc<ContentFragments>,
    class_salt: String,
    rng: Mutex<StdRng>,
}

impl FunctionTable {
    /// Build a table with a deterministic RNG. Tests use this to pin output.
    pub fn new(fragments: Arc<ContentFragments>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let class_salt = format!("{:016x}", rng.r#gen::<u64>());
        Self {
            fragments,
            class_salt,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_entropy(fragments: Arc<ContentFragments>) -> Self {
        Self::new(fragments, rand::thread_rng().r#gen())
    }

    /// Dispatch a content function by name.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        match name {
            "random_keyword" => {
                from_args::<()>(args)?;
                self.pick("random_keyword", "keyword", &self.fragments.keywords)
                    .map(Value::from)
            }
            "random_title" => {
                from_args::<()>(args)?;
                self.pick("random_title", "title", &self.fragments.titles)
                    .map(Value::from)
            }
            "random_content" => {
                from_args::<()>(args)?;
                self.pick("random_content", "content", &self.fragments.contents)
                    .map(Value::from)
            }
            "random_image" => {
                from_args::<()>(args)?;
                self.pick("random_image", "image", &self.fragments.images)
                    .map(Value::from)
            }
            "random_url" => {
                from_args::<()>(args)?;
                self.random_url().map(Value::from)
            }
            "random_number" => {
                let (min, max): (i64, i64) = from_args(args)?;
                self.random_number(min, max).map(Value::from)
            }
            "pinyin" => {
                let (text,): (String,) = from_args(args)?;
                Ok(Value::from(pinyin::annotate(&text)))
            }
            "cls" => {
                let (name,): (String,) = from_args(args)?;
                Ok(Value::from(self.class_name(&name)))
            }
            "iterate" => {
                let (first, second): (i64, Option<i64>) = from_args(args)?;
                let (start, end) = match second {
                    Some(end) => (first, end),
                    None => (0, first),
                };
                Ok(iterate(start, end))
            }
            other => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("no content function named `{other}`"),
            )),
        }
    }

    /// One item of `items` drawn from this table's RNG.
    pub fn draw(&self, items: &[String]) -> Option<String> {
        let mut rng = mutex_lock(&self.rng, "template::functions", "draw");
        items.choose(&mut *rng).cloned()
    }

    fn pick(&self, function: &str, pool: &str, items: &[String]) -> Result<String, Error> {
        self.draw(items).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("{function}() needs a non-empty {pool} pool"),
            )
        })
    }

    fn random_url(&self) -> Result<String, Error> {
        let keyword = self.pick("random_url", "keyword", &self.fragments.keywords)?;
        let slug = derive_slug(&keyword).unwrap_or_else(|_| URL_FALLBACK_SLUG.to_string());
        let mut rng = mutex_lock(&self.rng, "template::functions", "random_url");
        let id: u32 = rng.gen_range(0..1_000_000);
        Ok(format!("/{slug}/{id:06}.html"))
    }

    fn random_number(&self, min: i64, max: i64) -> Result<i64, Error> {
        if min > max {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("random_number({min}, {max}): min is greater than max"),
            ));
        }
        let mut rng = mutex_lock(&self.rng, "template::functions", "random_number");
        Ok(rng.gen_range(min..=max))
    }

    fn class_name(&self, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.class_salt.as_bytes());
        hasher.update(name.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("c{}", &digest[..8])
    }
}

impl Object for FunctionTable {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        self.dispatch(method, args)
    }
}

fn iterate(start: i64, end: i64) -> Value {
    let end = end.min(start.saturating_add(MAX_ITERATIONS));
    Value::from_iter(start..end.max(start))
}
