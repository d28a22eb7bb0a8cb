//! Lenient field access over raw event payloads.
//!
//! Payload shapes drift between server builds: ids arrive as numbers or
//! strings, names under several keys, sometimes the payload is not an object
//! at all. Every accessor here returns `None` instead of failing.

use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct Fields<'a>(pub &'a Value);

impl<'a> Fields<'a> {
    fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        let map = self.0.as_object()?;
        keys.iter()
            .filter_map(|key| map.get(*key))
            .find(|value| !value.is_null())
    }

    /// First non-blank text under any of `keys`. Numbers are rendered.
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        match self.first(keys)? {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// First id under any of `keys`, from a non-negative integer or a
    /// numeric string.
    pub fn id(&self, keys: &[&str]) -> Option<u64> {
        match self.first(keys)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// First number under any of `keys`, from a number or a numeric string.
    pub fn number(&self, keys: &[&str]) -> Option<f64> {
        let number = match self.first(keys)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|n| n.is_finite())
    }
}

/// Render an amount with two decimals.
pub fn money(amount: f64) -> String {
    format!("S/ {:.2}", amount)
}

/// Render a score without a trailing `.0`.
pub fn score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_skips_blank_and_null() {
        let payload = json!({ "curso_nombre": "  ", "curso": null, "nombre_curso": "Álgebra" });
        let fields = Fields(&payload);
        assert_eq!(
            fields.text(&["curso_nombre", "curso", "nombre_curso"]).as_deref(),
            Some("Álgebra")
        );
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let payload = json!({ "id_curso": "12", "id_tarea": 5, "id_pago": -1 });
        let fields = Fields(&payload);
        assert_eq!(fields.id(&["id_curso"]), Some(12));
        assert_eq!(fields.id(&["id_tarea"]), Some(5));
        assert_eq!(fields.id(&["id_pago"]), None);
    }

    #[test]
    fn non_object_payloads_yield_nothing() {
        for payload in [json!(null), json!("texto"), json!([1, 2]), json!(3)] {
            let fields = Fields(&payload);
            assert!(fields.text(&["titulo"]).is_none());
            assert!(fields.id(&["id"]).is_none());
        }
    }

    #[test]
    fn number_formats() {
        let payload = json!({ "monto": "150,5", "nota": 18 });
        let fields = Fields(&payload);
        assert_eq!(fields.number(&["monto"]).map(money).as_deref(), Some("S/ 150.50"));
        assert_eq!(fields.number(&["nota"]).map(score).as_deref(), Some("18"));
        assert_eq!(score(15.25), "15.2");
    }
}
