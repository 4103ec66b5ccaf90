#[cfg(test)]
mod supervision;
