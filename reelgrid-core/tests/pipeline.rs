//! End-to-end stage wiring over the in-process bus: the five-query
//! topology in miniature, driven through real `run_stage` loops.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reelgrid_config::{
    AggregatorSettings, FilterSettings, FilterValues, JoinKind, JoinerSettings, QueueSpec,
    RouterSettings, ShardedOutput,
};
use reelgrid_core::stage::{run_stage, PacketHandler, QueueBinding};
use reelgrid_core::{
    InProcBus, MessageBus, MostLeastRatedMovies, MoviesFilter, MoviesJoiner, Router,
    TopInvestorCountries,
};
use reelgrid_model::{
    ClientDisconnected, ClientId, Eof, Movie, MoviesBatch, Packet, Rating, RatingsBatch,
};
use tokio_util::sync::CancellationToken;

fn spec(queue: &str, exchange: &str) -> QueueSpec {
    QueueSpec {
        queue: queue.to_string(),
        exchange: Some(exchange.to_string()),
    }
}

fn spawn_stage<H: PacketHandler + Send + 'static>(
    bus: Arc<dyn MessageBus>,
    inputs: Vec<QueueBinding>,
    mut handler: H,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_stage(&bus, &inputs, &mut handler, 0.0, &shutdown)
            .await
            .expect("stage failed");
    })
}

/// Read packets off an observer queue until `eofs` EOF packets arrived
/// or the deadline passes.
async fn collect_until_eofs(
    bus: &Arc<dyn MessageBus>,
    queue: &str,
    eofs: usize,
    deadline: Duration,
) -> Vec<Packet> {
    let mut stream = bus.consume(queue).await.unwrap();
    let mut out = Vec::new();
    let mut seen_eofs = 0;
    let _ = tokio::time::timeout(deadline, async {
        while seen_eofs < eofs {
            let Some(delivery) = stream.next().await else {
                break;
            };
            let packet = Packet::decode(&delivery.payload).unwrap();
            if matches!(packet, Packet::Eof(_)) {
                seen_eofs += 1;
            }
            out.push(packet);
        }
    })
    .await;
    out
}

fn movie(
    id: i64,
    title: &str,
    genres: &[&str],
    countries: &[&str],
    date: &str,
    budget: i64,
) -> Movie {
    Movie {
        id: Some(id),
        title: Some(title.to_string()),
        genres: Some(genres.iter().map(|g| g.to_string()).collect()),
        production_countries: Some(countries.iter().map(|c| c.to_string()).collect()),
        release_date: Some(date.parse().unwrap()),
        budget: Some(budget),
        overview: Some(String::new()),
        revenue: Some(0.0),
    }
}

#[tokio::test]
async fn q1_filter_chain_keeps_only_matching_movies() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let shutdown = CancellationToken::new();

    let filter_countries = FilterSettings {
        filter_field: "production_countries".to_string(),
        filter_values: FilterValues::Countries(vec![
            "Argentina".to_string(),
            "Spain".to_string(),
        ]),
        output_fields: vec![
            "id".to_string(),
            "title".to_string(),
            "genres".to_string(),
            "release_date".to_string(),
        ],
        input_queues: vec![spec("movies_q1", "movies")],
        output_exchange: "movies_ar_es".to_string(),
        cluster_size: 1,
        id: 1,
    };
    let filter_years = FilterSettings {
        filter_field: "release_date".to_string(),
        filter_values: FilterValues::YearRange {
            min: 2000,
            max: Some(2009),
        },
        output_fields: vec!["id".to_string(), "title".to_string(), "genres".to_string()],
        input_queues: vec![spec("movies_ar_es", "movies_ar_es")],
        output_exchange: "q1_results".to_string(),
        cluster_size: 1,
        id: 1,
    };

    bus.bind("movies_q1", "movies").await.unwrap();
    bus.bind("movies_ar_es", "movies_ar_es").await.unwrap();
    bus.bind("observer", "q1_results").await.unwrap();

    let first = MoviesFilter::new(Arc::clone(&bus), &filter_countries).unwrap();
    let second = MoviesFilter::new(Arc::clone(&bus), &filter_years).unwrap();
    spawn_stage(
        Arc::clone(&bus),
        MoviesFilter::inputs(&filter_countries),
        first,
        shutdown.clone(),
    );
    spawn_stage(
        Arc::clone(&bus),
        MoviesFilter::inputs(&filter_years),
        second,
        shutdown.clone(),
    );

    let client_id = ClientId::new();
    let batch = MoviesBatch::new(
        client_id,
        vec![
            movie(1, "A", &["Drama"], &["Argentina", "Spain"], "2005-06-01", 0),
            movie(2, "B", &["Drama"], &["Argentina", "Spain"], "1999-01-01", 0),
            movie(3, "C", &["Comedy"], &["France"], "2005-01-01", 0),
        ],
    );
    bus.publish("movies", Packet::from(batch).encode().unwrap())
        .await
        .unwrap();
    bus.publish("movies", Packet::from(Eof::new(client_id)).encode().unwrap())
        .await
        .unwrap();

    let packets = collect_until_eofs(&bus, "observer", 1, Duration::from_secs(3)).await;
    shutdown.cancel();

    let rows: Vec<String> = packets
        .iter()
        .filter_map(|p| match p {
            Packet::Movies(batch) => Some(batch.to_csv_lines()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(rows, vec!["1,A,[\"Drama\"]".to_string()]);
    assert!(matches!(packets.last(), Some(Packet::Eof(_))));
}

#[tokio::test]
async fn q2_top_investors_end_to_end() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let shutdown = CancellationToken::new();

    let filter_one_country = FilterSettings {
        filter_field: "production_countries".to_string(),
        filter_values: FilterValues::CountryCount(1),
        output_fields: vec!["production_countries".to_string(), "budget".to_string()],
        input_queues: vec![spec("movies_q2", "movies")],
        output_exchange: "movies_one_country".to_string(),
        cluster_size: 1,
        id: 1,
    };
    let aggregator = AggregatorSettings {
        input_queues: vec![spec("movies_one_country", "movies_one_country")],
        output_exchange: "top_investor_countries".to_string(),
        storage_path: tempfile::tempdir().unwrap().keep(),
        top_n: 5,
    };

    bus.bind("movies_q2", "movies").await.unwrap();
    bus.bind("movies_one_country", "movies_one_country")
        .await
        .unwrap();
    bus.bind("observer", "top_investor_countries").await.unwrap();

    let filter = MoviesFilter::new(Arc::clone(&bus), &filter_one_country).unwrap();
    let calculator = TopInvestorCountries::new(Arc::clone(&bus), &aggregator).unwrap();
    spawn_stage(
        Arc::clone(&bus),
        MoviesFilter::inputs(&filter_one_country),
        filter,
        shutdown.clone(),
    );
    spawn_stage(
        Arc::clone(&bus),
        TopInvestorCountries::inputs(&aggregator),
        calculator,
        shutdown.clone(),
    );

    let client_id = ClientId::new();
    let batch = MoviesBatch::new(
        client_id,
        vec![
            movie(1, "m1", &[], &["X"], "2000-01-01", 100),
            movie(2, "m2", &[], &["X"], "2000-01-01", 50),
            movie(3, "m3", &[], &["Y"], "2000-01-01", 30),
            movie(4, "m4", &[], &["Z"], "2000-01-01", 10),
            movie(5, "m5", &[], &["X", "Y"], "2000-01-01", 999),
        ],
    );
    bus.publish("movies", Packet::from(batch).encode().unwrap())
        .await
        .unwrap();
    bus.publish("movies", Packet::from(Eof::new(client_id)).encode().unwrap())
        .await
        .unwrap();

    let packets = collect_until_eofs(&bus, "observer", 1, Duration::from_secs(3)).await;
    shutdown.cancel();

    let rows: Vec<String> = packets
        .iter()
        .filter_map(|p| match p {
            Packet::InvestorCountry(ic) => Some(ic.to_csv_line()),
            _ => None,
        })
        .collect();
    assert_eq!(rows, vec!["X,150", "Y,30", "Z,10"]);
}

#[tokio::test]
async fn q3_router_joiner_and_rating_means() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let shutdown = CancellationToken::new();

    let movies_router = RouterSettings {
        input_queues: vec![QueueSpec {
            queue: "movies_to_route".to_string(),
            exchange: None,
        }],
        outputs: vec![ShardedOutput {
            prefix: "movies_q3".to_string(),
            dest_nodes: 1,
        }],
        cluster_size: 1,
        id: 1,
    };
    let ratings_router = RouterSettings {
        input_queues: vec![QueueSpec {
            queue: "ratings_to_route".to_string(),
            exchange: None,
        }],
        outputs: vec![ShardedOutput {
            prefix: "ratings".to_string(),
            dest_nodes: 1,
        }],
        cluster_size: 1,
        id: 1,
    };
    let joiner_settings = JoinerSettings {
        kind: JoinKind::Ratings,
        movies_queue_prefix: "movies_q3".to_string(),
        to_join_queue_prefix: "ratings".to_string(),
        output_exchange: "joined_ratings".to_string(),
        cluster_size: 1,
        id: 1,
        storage_path: tempfile::tempdir().unwrap().keep(),
    };
    let aggregator = AggregatorSettings {
        input_queues: vec![spec("joined_ratings", "joined_ratings")],
        output_exchange: "most_least_rated".to_string(),
        storage_path: tempfile::tempdir().unwrap().keep(),
        top_n: 0,
    };

    bus.bind("movies_q3_1", "movies_q3_1").await.unwrap();
    bus.bind("ratings_1", "ratings_1").await.unwrap();
    bus.bind("joined_ratings", "joined_ratings").await.unwrap();
    bus.bind("observer", "most_least_rated").await.unwrap();

    let movies_router_stage = Router::new(Arc::clone(&bus), &movies_router).unwrap();
    let ratings_router_stage = Router::new(Arc::clone(&bus), &ratings_router).unwrap();
    let joiner = MoviesJoiner::new(Arc::clone(&bus), &joiner_settings).unwrap();
    let joiner_inputs = joiner.inputs();
    let calculator = MostLeastRatedMovies::new(Arc::clone(&bus), &aggregator).unwrap();

    spawn_stage(
        Arc::clone(&bus),
        Router::inputs(&movies_router),
        movies_router_stage,
        shutdown.clone(),
    );
    spawn_stage(
        Arc::clone(&bus),
        Router::inputs(&ratings_router),
        ratings_router_stage,
        shutdown.clone(),
    );
    spawn_stage(Arc::clone(&bus), joiner_inputs, joiner, shutdown.clone());
    spawn_stage(
        Arc::clone(&bus),
        MostLeastRatedMovies::inputs(&aggregator),
        calculator,
        shutdown.clone(),
    );

    let client_id = ClientId::new();
    // Ratings first: the joiner has to defer until the movies arrive.
    let ratings = RatingsBatch::new(
        client_id,
        vec![
            Rating {
                movie_id: 1,
                rating: 5.0,
            },
            Rating {
                movie_id: 1,
                rating: 5.0,
            },
            Rating {
                movie_id: 1,
                rating: 4.0,
            },
            Rating {
                movie_id: 2,
                rating: 1.0,
            },
            Rating {
                movie_id: 2,
                rating: 2.0,
            },
        ],
    );
    bus.publish_to_queue("ratings_to_route", Packet::from(ratings).encode().unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let movies = MoviesBatch::new(
        client_id,
        vec![
            movie(1, "A", &[], &["Argentina"], "2001-05-01", 0),
            movie(2, "B", &[], &["Argentina"], "2001-07-01", 0),
        ],
    );
    bus.publish_to_queue("movies_to_route", Packet::from(movies).encode().unwrap())
        .await
        .unwrap();
    bus.publish_to_queue(
        "movies_to_route",
        Packet::from(Eof::new(client_id)).encode().unwrap(),
    )
    .await
    .unwrap();
    bus.publish_to_queue(
        "ratings_to_route",
        Packet::from(Eof::new(client_id)).encode().unwrap(),
    )
    .await
    .unwrap();

    let packets = collect_until_eofs(&bus, "observer", 1, Duration::from_secs(5)).await;
    shutdown.cancel();

    let rows: Vec<String> = packets
        .iter()
        .filter_map(|p| match p {
            Packet::MovieRatings(batch) => Some(batch.to_csv_lines()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(rows.len(), 2, "unexpected rows: {rows:?}");
    assert_eq!(rows[0], format!("1,A,{}", 14.0 / 3.0));
    assert_eq!(rows[1], "2,B,1.5");
    assert!(matches!(packets.last(), Some(Packet::Eof(_))));
}

#[tokio::test]
async fn sharded_eof_ring_emits_exactly_one_eof() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let shutdown = CancellationToken::new();
    let cluster_size = 3;

    bus.bind("movies_q1", "movies").await.unwrap();
    bus.bind("observer", "filtered").await.unwrap();

    for id in 1..=cluster_size {
        let settings = FilterSettings {
            filter_field: "production_countries".to_string(),
            filter_values: FilterValues::Countries(vec!["Argentina".to_string()]),
            output_fields: vec!["id".to_string(), "title".to_string()],
            input_queues: vec![spec("movies_q1", "movies")],
            output_exchange: "filtered".to_string(),
            cluster_size,
            id,
        };
        let filter = MoviesFilter::new(Arc::clone(&bus), &settings).unwrap();
        spawn_stage(
            Arc::clone(&bus),
            MoviesFilter::inputs(&settings),
            filter,
            shutdown.clone(),
        );
    }

    let client_id = ClientId::new();
    bus.publish("movies", Packet::from(Eof::new(client_id)).encode().unwrap())
        .await
        .unwrap();

    // Give the token time to make its rounds, then a grace period in
    // which a duplicate EOF would show up.
    let packets = collect_until_eofs(&bus, "observer", 2, Duration::from_secs(2)).await;
    shutdown.cancel();

    let eofs = packets
        .iter()
        .filter(|p| matches!(p, Packet::Eof(_)))
        .count();
    assert_eq!(eofs, 1);
}

#[tokio::test]
async fn router_partitions_every_item_exactly_once() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let settings = RouterSettings {
        input_queues: vec![QueueSpec {
            queue: "ratings_in".to_string(),
            exchange: None,
        }],
        outputs: vec![ShardedOutput {
            prefix: "shard".to_string(),
            dest_nodes: 3,
        }],
        cluster_size: 1,
        id: 1,
    };
    for dest in 1..=3 {
        bus.bind(&format!("shard_q{dest}"), &format!("shard_{dest}"))
            .await
            .unwrap();
    }
    let mut router = Router::new(Arc::clone(&bus), &settings).unwrap();

    let client_id = ClientId::new();
    let ratings: Vec<Rating> = (0..100)
        .map(|movie_id| Rating {
            movie_id,
            rating: 1.0,
        })
        .collect();
    router
        .handle("ratings_in", RatingsBatch::new(client_id, ratings).into())
        .await
        .unwrap();

    let mut routed: Vec<i64> = Vec::new();
    for dest in 1..=3u32 {
        let mut stream = bus.consume(&format!("shard_q{dest}")).await.unwrap();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(50), stream.next()).await
        {
            let Packet::Ratings(batch) = Packet::decode(&delivery.payload).unwrap() else {
                panic!("expected a ratings sub-batch");
            };
            for rating in &batch.ratings {
                assert_eq!(
                    reelgrid_core::stage::router::shard_for(rating.movie_id, 3),
                    dest
                );
                routed.push(rating.movie_id);
            }
        }
    }
    routed.sort_unstable();
    let expected: Vec<i64> = (0..100).collect();
    assert_eq!(routed, expected);
}

#[tokio::test]
async fn restart_with_redelivery_reaches_the_oracle_state() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let state_dir = tempfile::tempdir().unwrap();
    let aggregator = AggregatorSettings {
        input_queues: vec![spec("movies_one_country", "movies_one_country")],
        output_exchange: "top_investor_countries".to_string(),
        storage_path: state_dir.path().to_path_buf(),
        top_n: 5,
    };
    bus.bind("observer", "top_investor_countries").await.unwrap();

    let client_id = ClientId::new();
    let batch = MoviesBatch::new(
        client_id,
        vec![movie(1, "m1", &[], &["X"], "2000-01-01", 100)],
    );

    // First incarnation incorporates the batch, then dies before the
    // broker saw an ack.
    {
        let mut calculator =
            TopInvestorCountries::new(Arc::clone(&bus), &aggregator).unwrap();
        calculator
            .handle("q", Packet::from(batch.clone()))
            .await
            .unwrap();
    }

    // The replacement worker gets the same delivery again.
    let mut calculator = TopInvestorCountries::new(Arc::clone(&bus), &aggregator).unwrap();
    calculator.handle("q", Packet::from(batch)).await.unwrap();
    calculator
        .handle("q", Packet::from(Eof::new(client_id)))
        .await
        .unwrap();

    let packets = collect_until_eofs(&bus, "observer", 1, Duration::from_secs(2)).await;
    let rows: Vec<String> = packets
        .iter()
        .filter_map(|p| match p {
            Packet::InvestorCountry(ic) => Some(ic.to_csv_line()),
            _ => None,
        })
        .collect();
    assert_eq!(rows, vec!["X,100"]);
}

#[tokio::test]
async fn disconnect_flows_through_the_join_path() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
    let shutdown = CancellationToken::new();

    let joiner_dir = tempfile::tempdir().unwrap();
    let joiner_settings = JoinerSettings {
        kind: JoinKind::Ratings,
        movies_queue_prefix: "movies_q3".to_string(),
        to_join_queue_prefix: "ratings".to_string(),
        output_exchange: "joined_ratings".to_string(),
        cluster_size: 1,
        id: 1,
        storage_path: joiner_dir.path().to_path_buf(),
    };
    let aggregator = AggregatorSettings {
        input_queues: vec![spec("joined_ratings", "joined_ratings")],
        output_exchange: "most_least_rated".to_string(),
        storage_path: tempfile::tempdir().unwrap().keep(),
        top_n: 0,
    };

    bus.bind("movies_q3_1", "movies_q3_1").await.unwrap();
    bus.bind("ratings_1", "ratings_1").await.unwrap();
    bus.bind("joined_ratings", "joined_ratings").await.unwrap();
    bus.bind("observer", "most_least_rated").await.unwrap();

    let joiner = MoviesJoiner::new(Arc::clone(&bus), &joiner_settings).unwrap();
    let joiner_inputs = joiner.inputs();
    let calculator = MostLeastRatedMovies::new(Arc::clone(&bus), &aggregator).unwrap();
    spawn_stage(Arc::clone(&bus), joiner_inputs, joiner, shutdown.clone());
    spawn_stage(
        Arc::clone(&bus),
        MostLeastRatedMovies::inputs(&aggregator),
        calculator,
        shutdown.clone(),
    );

    let client_id = ClientId::new();
    let movies = MoviesBatch::new(client_id, vec![movie(1, "A", &[], &[], "2001-01-01", 0)]);
    bus.publish("movies_q3_1", Packet::from(movies).encode().unwrap())
        .await
        .unwrap();
    bus.publish(
        "ratings_1",
        Packet::from(ClientDisconnected::new(client_id)).encode().unwrap(),
    )
    .await
    .unwrap();

    // The disconnect is forwarded down to the results edge ...
    let mut observer = bus.consume("observer").await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(2), observer.next())
        .await
        .expect("no packet reached the observer")
        .unwrap();
    assert!(matches!(
        Packet::decode(&delivery.payload).unwrap(),
        Packet::ClientDisconnected(_)
    ));
    shutdown.cancel();

    // ... and no per-client file survives in the joiner's directory.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let client_files: Vec<String> = std::fs::read_dir(joiner_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(&client_id.to_string()))
        .collect();
    assert!(client_files.is_empty(), "leaked files: {client_files:?}");
}
