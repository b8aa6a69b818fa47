use crate::tag::Tag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
    Timer,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"c",
            MetricType::Gauge => b"g",
            MetricType::Timer => b"ms",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricValue {
    Signed(i64),
    Unsigned(u128),
    FloatingPoint(f64),
}

/// Renders metric values into their textual wire representation.
///
/// Integers are written in base 10. Floating-point values are written with the fewest digits that still round-trip,
/// in plain decimal notation: no exponent, and no trailing `.0` for integral values.
///
/// Only values that need their exponent expanded go through `float_buf`; everything else is borrowed straight from
/// the `itoa` and `ryu` buffers, so formatting does not allocate.
pub(crate) struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
    float_buf: String,
}

impl MetricValueFormatter {
    pub fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new(), float_buf: String::new() }
    }

    pub fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Signed(v) => self.int_writer.format(v),
            MetricValue::Unsigned(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => self.format_float(v),
        }
    }

    fn format_float(&mut self, value: f64) -> &str {
        if value.is_nan() {
            return "NaN";
        }
        if value.is_infinite() {
            return if value.is_sign_positive() { "+Inf" } else { "-Inf" };
        }

        let shortest = self.float_writer.format_finite(value);

        // `ryu` switches to scientific notation for very large and very small magnitudes, which not every StatsD
        // server parses, so expand the exponent back out into plain digits. Everything else is used as-is.
        let Some((mantissa, exponent)) = shortest.split_once('e') else {
            return shortest.strip_suffix(".0").unwrap_or(shortest);
        };

        let buf = &mut self.float_buf;
        buf.clear();

        let mantissa = match mantissa.strip_prefix('-') {
            Some(rest) => {
                buf.push('-');
                rest
            }
            None => mantissa,
        };

        let exponent = exponent.parse::<isize>().unwrap_or(0);
        let (int_digits, frac_digits) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let digits_len = (int_digits.len() + frac_digits.len()) as isize;
        let point = int_digits.len() as isize + exponent;

        if point <= 0 {
            buf.push_str("0.");
            push_zeros(buf, point.unsigned_abs());
            buf.push_str(int_digits);
            buf.push_str(frac_digits);
        } else if point >= digits_len {
            buf.push_str(int_digits);
            buf.push_str(frac_digits);
            push_zeros(buf, (point - digits_len) as usize);
        } else {
            let digits_start = buf.len();
            buf.push_str(int_digits);
            buf.push_str(frac_digits);
            buf.insert(digits_start + point as usize, '.');
        }

        buf
    }
}

fn push_zeros(buf: &mut String, count: usize) {
    buf.extend(std::iter::repeat('0').take(count));
}

/// Writes complete metric lines.
///
/// The prefix and the default tags are rendered once, when the writer is created, and then copied verbatim into every
/// line. A line looks like `<prefix><name>:<value>[;<key>=<value>]*|<type>\n`.
pub(crate) struct LineWriter {
    prefix: Vec<u8>,
    default_tags: Vec<u8>,
}

impl LineWriter {
    /// Creates a new `LineWriter`.
    ///
    /// A non-empty prefix always ends up separated from the metric name by a single `.`, whether or not the given
    /// prefix already ended with one. An empty prefix, or a lone `.`, is dropped entirely rather than leaving a
    /// leading `.` on every metric name.
    pub fn new(prefix: Option<&str>, default_tags: &[Tag]) -> Self {
        let mut prefix_buf = Vec::new();
        if let Some(prefix) = prefix {
            let prefix = prefix.strip_suffix('.').unwrap_or(prefix);
            if !prefix.is_empty() {
                prefix_buf.extend_from_slice(prefix.as_bytes());
                prefix_buf.push(b'.');
            }
        }

        let mut default_tags_buf = Vec::new();
        write_tags(&mut default_tags_buf, default_tags);

        Self { prefix: prefix_buf, default_tags: default_tags_buf }
    }

    /// Writes a single metric line, including its trailing newline, to `buf`.
    pub fn write_line(&self, buf: &mut Vec<u8>, name: &str, value: &str, metric_type: MetricType, tags: &[Tag]) {
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(name.as_bytes());
        buf.push(b':');
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(&self.default_tags);
        write_tags(buf, tags);
        buf.push(b'|');
        buf.extend_from_slice(metric_type.as_bytes());
        buf.push(b'\n');
    }
}

/// Appends `;<key>=<value>` to `buf` for every tag, in order.
pub(crate) fn write_tags(buf: &mut Vec<u8>, tags: &[Tag]) {
    for tag in tags {
        buf.push(b';');
        buf.extend_from_slice(tag.key().as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(tag.value().as_bytes());
    }
}
