use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "printf.pest"]
pub struct FormatParser;
