use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::hc_digest::{sha256_hex, string_hash};
use crate::hc_interface::SimTick;

const ID_MASK: &str = r"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\.,:;/#\-_ ";
const HEX_MASK: &str = "0123456789abcdefABCDEF";
const MAX_PRICE: f64 = 25000.0;

/// Rendering of a sales record inside a transaction payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesStyle {
    #[default]
    Xml,
    Json,
}

/// Seed shared by the dummy and the sales generators: the Java string hash of
/// the origin divided by the tick (tick 0 counts as 1).
pub fn predictable_seed(origin: &str, tick: SimTick) -> i64 {
    string_hash(origin) as i64 / tick.max(1) as i64
}

/// One EET-style cash register receipt. Generation is a pure function of the
/// origin and the tick, so a replayed run produces identical payloads.
#[derive(Clone, Debug, PartialEq)]
pub struct SalesRecord {
    head: Vec<(&'static str, String)>,
    body: Vec<(&'static str, String)>,
    pkp: String,
    bkp: String,
}

impl SalesRecord {
    pub fn generate(origin: &str, tick: SimTick) -> Self {
        let seed = predictable_seed(origin, tick);
        let mut rng = StdRng::seed_from_u64(seed as u64);
        let stamp = timestamp(tick);

        let mut head = vec![
            ("uuid", name_uuid(&seed.to_string())),
            ("dat_odesl", stamp.clone()),
            ("prvni_zaslani", stamp.clone()),
        ];
        if rng.gen_bool(0.5) {
            let verify = if rng.gen_bool(0.5) { "true" } else { "false" };
            head.push(("overeni", verify.to_string()));
        }

        let mut body = vec![("dic_popl", vat_number(&mut rng))];
        if rng.gen_bool(0.5) {
            body.push(("dic_poverujiciho", vat_number(&mut rng)));
        }
        body.push(("id_provoz", rng.gen_range(0..1_000_000).to_string()));
        body.push(("id_pokl", pick_chars(&mut rng, 20, ID_MASK)));
        body.push(("porad_cis", pick_chars(&mut rng, 25, ID_MASK)));
        body.push(("dat_trzby", stamp));
        body.push(("celk_trzba", price(&mut rng)));

        if rng.gen_bool(0.5) {
            body.push(("zakl_nepodl_dph", price(&mut rng)));
        }
        for (base, tax, rate) in [("zakl_dan1", "dan1", 0.21), ("zakl_dan2", "dan2", 0.15), ("zakl_dan3", "dan3", 0.10)] {
            if rng.gen_bool(0.5) {
                let amount = rng.gen::<f64>() * MAX_PRICE;
                body.push((base, format!("{:.2}", amount)));
                body.push((tax, format!("{:.2}", amount * rate)));
            }
        }
        for optional in ["cest_sluz", "pouzit_zboz1", "pouzit_zboz2", "pouzit_zboz3", "urceno_cerp_zuct", "cerp_zuct"] {
            if rng.gen_bool(0.5) {
                body.push((optional, price(&mut rng)));
            }
        }
        body.push(("rezim", rng.gen_range(0..2).to_string()));

        // fake signatures: pkp draws from the digest of the receipt's key fields
        let key_fields = ["dic_popl", "id_provoz", "id_pokl", "porad_cis", "dat_trzby", "celk_trzba"]
            .iter()
            .map(|key| field(&body, key))
            .collect::<Vec<_>>()
            .join("|");
        let pkp = pick_chars(&mut rng, 344, &sha256_hex(&key_fields));
        let bkp = (0..5)
            .map(|_| pick_chars(&mut rng, 8, HEX_MASK))
            .collect::<Vec<_>>()
            .join("-");

        Self { head, body, pkp, bkp }
    }

    pub fn head(&self, key: &str) -> Option<&str> {
        lookup(&self.head, key)
    }

    pub fn body(&self, key: &str) -> Option<&str> {
        lookup(&self.body, key)
    }

    pub fn render(&self, style: SalesStyle) -> String {
        match style {
            SalesStyle::Xml => self.to_xml(),
            SalesStyle::Json => self.to_json(),
        }
    }

    /// EET data section only, without the SOAP envelope.
    pub fn to_xml(&self) -> String {
        format!(
            "<eet:Trzba><eet:Hlavicka {}/><eet:Data {}/><eet:KontrolniKody>\
             <eet:pkp digest='SHA256' cipher='RSA2048' encoding='base64'>{}</eet:pkp>\
             <eet:bkp digest='SHA1' encoding='base16'>{}</eet:bkp></eet:KontrolniKody></eet:Trzba>",
            attributes(&self.head),
            attributes(&self.body),
            self.pkp,
            self.bkp
        )
    }

    /// Condensed single-level JSON-like object.
    pub fn to_json(&self) -> String {
        let fields = self
            .head
            .iter()
            .chain(self.body.iter())
            .map(|(key, value)| format!("{}:'{}', ", key, value))
            .collect::<String>();
        format!(
            "{{{}pkp: {{digest:'SHA256', cipher:'RSA2048', encoding:'base64', data:'{}'}}, \
             bkp: {{digest:'SHA1', encoding:'base16', data:'{}'}}}}",
            fields, self.pkp, self.bkp
        )
    }
}

fn attributes(pairs: &[(&'static str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}='{}' ", key, value))
        .collect()
}

fn lookup<'a>(pairs: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}

fn field<'a>(pairs: &'a [(&'static str, String)], key: &str) -> &'a str {
    lookup(pairs, key).unwrap_or("")
}

fn pick_chars(rng: &mut StdRng, len: usize, alphabet: &str) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    (0..len).map(|_| chars[rng.gen_range(0..chars.len())]).collect()
}

fn vat_number(rng: &mut StdRng) -> String {
    let digits = if rng.gen_bool(0.5) { 8 } else { 10 };
    let number: String = (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("CZ{}", number)
}

fn price(rng: &mut StdRng) -> String {
    format!("{:.2}", rng.gen::<f64>() * MAX_PRICE)
}

/// Name-based identifier laid out as a UUID.
fn name_uuid(name: &str) -> String {
    let hex = sha256_hex(name);
    format!(
        "{}-{}-3{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[13..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// ISO-8601 instant at `2018-01-01T12:00 +01:00` plus `tick` milliseconds.
fn timestamp(tick: SimTick) -> String {
    let millis = tick % 1000;
    let seconds = tick / 1000;
    let minutes = seconds / 60;
    let hours = 12 + minutes / 60;
    let day = 1 + hours / 24;

    let mut out = format!(
        "2018-01-{:02}T{:02}:{:02}:{:02}",
        day,
        hours % 24,
        minutes % 60,
        seconds % 60
    );
    if millis != 0 {
        out.push_str(&format!(".{:03}", millis));
    }
    out.push_str("+01:00");
    out
}
