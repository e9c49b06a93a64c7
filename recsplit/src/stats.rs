use std::io::{self, Write};

/// Receives information about the progress of construction.
pub trait BuildStatsCollector {
    /// Called once per bucket, in bucket order, after the bucket of `size` keys has been encoded on `bits` bits.
    #[inline(always)] fn bucket(&mut self, _index: usize, _size: usize, _bits: usize) {}

    /// Called when the whole function, of `total_bits` bits, is ready.
    #[inline(always)] fn end(&mut self, _total_bits: usize) {}
}

impl BuildStatsCollector for () {}

/// Sums the sizes and bit lengths of all buckets.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildTotals {
    pub buckets: usize,
    pub keys: usize,
    pub data_bits: usize,
    pub total_bits: usize,
}

impl BuildStatsCollector for BuildTotals {
    #[inline] fn bucket(&mut self, _index: usize, size: usize, bits: usize) {
        self.buckets += 1;
        self.keys += size;
        self.data_bits += bits;
    }

    #[inline] fn end(&mut self, total_bits: usize) { self.total_bits = total_bits; }
}

/// Prints a line `index size bits` for each bucket and `total bits` at the end.
///
/// The first write error stops printing and is kept until [`Self::into_inner`].
pub struct BuildStatsPrinter<W: Write = std::io::Stdout> {
    writer: W,
    error: Option<io::Error>,
}

impl BuildStatsPrinter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> BuildStatsPrinter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, error: None }
    }

    /// Returns the error of the first failed write, if any.
    pub fn error(&self) -> Option<&io::Error> { self.error.as_ref() }

    /// Returns the writer, or the error of the first failed write.
    pub fn into_inner(self) -> io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.writer),
        }
    }

    fn print(&mut self, line: std::fmt::Arguments<'_>) {
        if self.error.is_some() { return; }
        if let Err(e) = self.writer.write_fmt(line) {
            self.error = Some(e);
        }
    }
}

impl<W: Write> BuildStatsCollector for BuildStatsPrinter<W> {
    fn bucket(&mut self, index: usize, size: usize, bits: usize) {
        self.print(format_args!("{} {} {}\n", index, size, bits));
    }

    fn end(&mut self, total_bits: usize) {
        self.print(format_args!("total {}\n", total_bits));
    }
}

pub trait AccessStatsCollector {
    /// Lookup algorithm calls this method for each node of given `size` whose seed it decodes,
    /// including the nodes of skipped sibling subtrees.
    #[inline(always)] fn node(&mut self, _size: usize) {}
}

impl AccessStatsCollector for () {}

/// Counts decoded nodes.
impl AccessStatsCollector for u32 {
    #[inline(always)] fn node(&mut self, _size: usize) { *self += 1; }
}

impl AccessStatsCollector for u64 {
    #[inline(always)] fn node(&mut self, _size: usize) { *self += 1; }
}

impl AccessStatsCollector for usize {
    #[inline(always)] fn node(&mut self, _size: usize) { *self += 1; }
}
