pub mod twelve_data_client;
