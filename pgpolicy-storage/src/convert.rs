/// Writes `s` as a double-quoted Postgres identifier, doubling embedded
/// quotes.
pub fn quote_to(buf: &mut String, s: &str) {
    buf.push('"');
    let mut last_end = 0;
    for (start, part) in s.match_indices('"') {
        buf.push_str(&s[last_end..start]);
        buf.push_str("\"\"");
        last_end = start + part.len();
    }
    buf.push_str(&s[last_end..]);
    buf.push('"');
}

pub fn quote(s: &str) -> String {
    let mut buf = String::with_capacity(s.len() + 2);
    quote_to(&mut buf, s);
    buf
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    let mut buf = String::with_capacity(schema.len() + table.len() + 5);
    quote_to(&mut buf, schema);
    buf.push('.');
    quote_to(&mut buf, table);
    buf
}
