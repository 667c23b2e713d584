use prettytable::{Cell, Row, Table};

use crate::chain::DiskImage;

pub fn log_chain(chain: &[DiskImage]) {
    let mut table = Table::new();

    table.set_titles(Row::new(vec![
        Cell::new("#"),
        Cell::new("Image"),
        Cell::new("Parent"),
    ]));

    for (i, image) in chain.iter().enumerate() {
        table.add_row(Row::new(vec![
            Cell::new(&(i + 1).to_string()),
            Cell::new(&image.remote_path),
            Cell::new(image.parent_remote_path.as_deref().unwrap_or("<root>")),
        ]));
    }

    table.printstd();
}
