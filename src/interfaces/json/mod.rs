pub mod catalogue_reader;
