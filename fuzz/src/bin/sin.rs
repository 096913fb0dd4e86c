#[cfg(not(windows))]
mod fuzz {
    use std::io::{self, Cursor};

    use honggfuzz::fuzz;
    use prfcreator::format::sin;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let reader = Cursor::new(data);
                let _ = sin::extract_image(reader, io::sink());
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
