use listingsdb::{Listing, Result};
use rand::random;

pub fn run_in_tempdir(f: impl FnOnce(&str) -> Result<()>) -> Result<()> {
    let rand: u64 = random();
    let dir = format!("/tmp/listingsdb-{rand}");
    _ = std::fs::remove_dir_all(&dir);

    f(&dir)?;

    _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[allow(dead_code)]
pub fn make_listings(count: usize, price_base: u32) -> Vec<Listing> {
    (0..count)
        .map(|i| {
            let mut l = Listing::default();
            l.price_per_unit = price_base + i as u32;
            l.amount = (i % 99) as u16 + 1;
            l.city = (i % 5) as u8;
            l.set_retainer_name(&format!("retainer{i}"));
            l
        })
        .collect()
}
